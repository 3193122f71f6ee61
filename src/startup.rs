use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{Clock, SessionPolicy, SystemClock, TokenAuthority, TokenCodec};
use crate::configuration::{RateLimitSettings, RevocationBackend, Settings, StorageBackend};
use crate::error::{AppError, ConfigError};
use crate::logger::LoggerMiddleware;
use crate::middleware::{AuthMiddleware, RateLimitMiddleware};
use crate::routes::{get_current_user, health_check, login, logout, refresh, register, revoke_family};
use crate::security::RateLimiterManager;
use crate::store::{
    FamilyStore, InMemoryFamilyStore, InMemoryRevocationCache, InMemoryUserStore, PgFamilyStore,
    PgUserStore, RedisRevocationCache, RevocationCache, UserStore,
};

pub fn run(
    listener: TcpListener,
    authority: Arc<TokenAuthority>,
    rate_limit: &RateLimitSettings,
) -> Result<Server, std::io::Error> {
    let authority_data = web::Data::from(authority.clone());
    // one limiter shared by every worker
    let limiter = Arc::new(RateLimiterManager::new(rate_limit));

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(Logger::default())
            .wrap(LoggerMiddleware)

            // Shared state
            .app_data(authority_data.clone())

            // Public routes
            .route("/health_check", web::get().to(health_check))
            .service(
                web::resource("/auth/register")
                    .wrap(RateLimitMiddleware::new(limiter.clone()))
                    .route(web::post().to(register)),
            )
            .service(
                web::resource("/auth/login")
                    .wrap(RateLimitMiddleware::new(limiter.clone()))
                    .route(web::post().to(login)),
            )
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/logout", web::post().to(logout))

            // Protected routes (require an admitted access token)
            .service(
                web::scope("/api")
                    .wrap(AuthMiddleware::new(authority.clone()))
                    .route("/me", web::get().to(get_current_user))
                    .route("/admin/families/{family_id}", web::delete().to(revoke_family)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}

/// Assembles the authority and its stores from configuration.
pub async fn build_authority(settings: &Settings) -> Result<Arc<TokenAuthority>, AppError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let policy = SessionPolicy::from_settings(&settings.session);

    let (users, families): (Arc<dyn UserStore>, Arc<dyn FamilyStore>) = match settings.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory stores, sessions will not survive a restart");
            (
                Arc::new(InMemoryUserStore::new()),
                Arc::new(InMemoryFamilyStore::new()),
            )
        }
        StorageBackend::Postgres => {
            tracing::info!("Attempting to connect to database");
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(policy.op_timeout)
                .connect(&settings.database.connection_string())
                .await?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| AppError::Internal(format!("Failed to migrate the database: {}", e)))?;
            tracing::info!("Database connection pool created successfully");
            (
                Arc::new(PgUserStore::new(pool.clone())),
                Arc::new(PgFamilyStore::new(pool)),
            )
        }
    };

    let revocations: Arc<dyn RevocationCache> = match settings.storage.revocation_backend {
        RevocationBackend::Memory => Arc::new(InMemoryRevocationCache::new(clock.clone())),
        RevocationBackend::Redis => {
            let url = settings
                .storage
                .redis_url
                .as_deref()
                .ok_or_else(|| ConfigError::MissingRequired("storage.redis_url".to_string()))?;
            Arc::new(RedisRevocationCache::connect(url).await?)
        }
    };

    let codec = TokenCodec::new(&settings.jwt, clock.clone());
    Ok(Arc::new(TokenAuthority::new(
        codec,
        users,
        families,
        revocations,
        clock,
        policy,
    )))
}
