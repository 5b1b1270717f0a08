use std::{io::Write, process, str::FromStr, sync::Arc};

use quill::{
    application::{
        categories::CategoryService,
        error::AppError,
        posts::PostService,
        repos::{
            CategoriesRepo, CategoriesWriteRepo, PageRequest, PostQueryFilter, PostTagsRepo,
            PostsRepo, PostsWriteRepo, TagsRepo, TagsWriteRepo,
        },
        tags::TagService,
    },
    cache::{
        CacheBackend, CacheConfig, CacheInvalidator, CacheStore, CategoryBatchLoader,
        CategoryListVariant, Coalescer, ListCache, MemoryCacheStore, TagBatchLoader,
    },
    config,
    domain::types::PostStatus,
    infra::{db::PostgresRepositories, error::InfraError, redis::RedisCacheStore, telemetry},
    relations::{EngineOptions, RelationEngine},
};
use serde::Serialize;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        config::Command::Migrate(_) => run_migrate(&settings).await,
        config::Command::Posts(args) => {
            let services = build_services(&settings).await?;
            run_posts(&services.posts, args.command).await
        }
        config::Command::Categories(args) => {
            let services = build_services(&settings).await?;
            run_categories(&services.categories, &args).await
        }
        config::Command::Tags(args) => {
            let services = build_services(&settings).await?;
            let tags = match args.name.as_deref() {
                Some(name) => services.tags.list_by_name(name).await?,
                None => services.tags.list_all().await?,
            };
            print_json(&tags)
        }
    }
}

async fn run_migrate(settings: &config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(settings).await?;
    PostgresRepositories::run_migrations(repositories.pool())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    info!("database migrations applied");
    Ok(())
}

async fn run_posts(posts: &PostService, command: config::PostsCommand) -> Result<(), AppError> {
    match command {
        config::PostsCommand::List(args) => {
            let page = PageRequest::new(args.offset, args.limit);
            let listing = match args.status.as_deref().map(str::trim) {
                None => posts.list_published(args.category_id, page).await?,
                Some(status) => {
                    let status = if status.eq_ignore_ascii_case("all") {
                        None
                    } else {
                        Some(PostStatus::from_str(status).map_err(AppError::validation)?)
                    };
                    let filter = PostQueryFilter {
                        status,
                        category_id: args.category_id,
                        include_content: false,
                    };
                    posts.list(&filter, page).await?
                }
            };
            print_json(&listing)
        }
        config::PostsCommand::Get(args) => print_json(&posts.get(&args.post_id).await?),
    }
}

async fn run_categories(
    categories: &CategoryService,
    args: &config::CategoriesArgs,
) -> Result<(), AppError> {
    let variant = if args.active {
        CategoryListVariant::Active
    } else {
        CategoryListVariant::All
    };

    if args.tree {
        print_json(&categories.tree(variant).await?)
    } else {
        print_json(&categories.list(variant).await?)
    }
}

struct Services {
    posts: PostService,
    categories: CategoryService,
    tags: TagService,
}

async fn build_services(settings: &config::Settings) -> Result<Services, AppError> {
    let repositories = init_repositories(settings).await?;
    let cache = CacheConfig::from(&settings.cache);
    let store = init_cache_store(&cache).await;

    let categories_repo: Arc<dyn CategoriesRepo> = repositories.clone();
    let categories_write_repo: Arc<dyn CategoriesWriteRepo> = repositories.clone();
    let tags_repo: Arc<dyn TagsRepo> = repositories.clone();
    let tags_write_repo: Arc<dyn TagsWriteRepo> = repositories.clone();
    let posts_repo: Arc<dyn PostsRepo> = repositories.clone();
    let posts_write_repo: Arc<dyn PostsWriteRepo> = repositories.clone();
    let post_tags_repo: Arc<dyn PostTagsRepo> = repositories;

    let category_loader =
        CategoryBatchLoader::new(categories_repo.clone(), store.clone(), cache.entity_ttl)
            .with_op_timeout(cache.op_timeout);
    let tag_loader = TagBatchLoader::new(tags_repo.clone(), store.clone(), cache.entity_ttl)
        .with_op_timeout(cache.op_timeout);
    let lists = ListCache::new(store.clone(), Coalescer::new(), cache.list_ttl)
        .with_op_timeout(cache.op_timeout);
    let invalidator = CacheInvalidator::new(store).with_op_timeout(cache.op_timeout);

    let engine = Arc::new(RelationEngine::new(
        category_loader.clone(),
        tag_loader.clone(),
        post_tags_repo,
        EngineOptions::from(&settings.relations),
    ));

    Ok(Services {
        posts: PostService::new(
            posts_repo,
            posts_write_repo,
            engine,
            lists.clone(),
            cache.count_ttl,
        ),
        categories: CategoryService::new(
            categories_repo,
            categories_write_repo,
            category_loader,
            lists.clone(),
            invalidator.clone(),
        ),
        tags: TagService::new(tags_repo, tags_write_repo, tag_loader, lists, invalidator),
    })
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

/// An unreachable redis server degrades to running without a cache.
async fn init_cache_store(cache: &CacheConfig) -> Option<Arc<dyn CacheStore>> {
    match &cache.backend {
        CacheBackend::Redis { url } => match RedisCacheStore::connect(url, cache.op_timeout).await {
            Ok(store) => Some(Arc::new(store)),
            Err(err) => {
                warn!(error = %err, "redis cache unavailable, continuing without cache");
                None
            }
        },
        CacheBackend::Memory => Some(Arc::new(MemoryCacheStore::from_config(cache))),
        CacheBackend::Disabled => {
            info!("cache disabled by configuration");
            None
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)
        .map_err(|err| AppError::unexpected(format!("failed to encode output: {err}")))?;
    writeln!(stdout).map_err(|err| AppError::from(InfraError::from(err)))?;
    Ok(())
}
