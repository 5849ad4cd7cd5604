use actix_web::{web, App, HttpServer};
use popularity_service::db::{Database, PgPopularityStore};
use popularity_service::jobs::scheduler::spawn_schedules;
use popularity_service::{handlers, Config, EntityClass, JobSettings, PopularityCache, PopularityJob};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "popularity_service=info,actix_web=info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// `--once <class>` or `--once=<class>`
fn once_class(args: &[String]) -> anyhow::Result<Option<EntityClass>> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--once=") {
            return Ok(Some(value.parse()?));
        }
        if arg == "--once" {
            let value = iter
                .next()
                .ok_or_else(|| anyhow::anyhow!("--once expects anime, manga or reviews"))?;
            return Ok(Some(value.parse()?));
        }
    }
    Ok(None)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let once = once_class(&args)?;

    let config = Config::from_env()?;

    info!(
        "Starting {} on HTTP:{}",
        config.service.service_name, config.service.http_port
    );

    let db = Database::connect(&config).await?;
    db.run_migrations().await?;

    let cache = match db.redis_manager().await {
        Ok(manager) => PopularityCache::new(manager, config.redis.cache_ttl_secs),
        Err(e) => {
            warn!(error = %e, "Redis unavailable - running without popularity cache");
            PopularityCache::disabled()
        }
    };

    let store = Arc::new(PgPopularityStore::new(
        db.pg.clone(),
        config.job.recent_window_days,
    ));
    let job = Arc::new(PopularityJob::new(
        store.clone(),
        store,
        cache,
        JobSettings::from(&config.job),
    ));

    if let Some(class) = once {
        info!(class = %class, "Running single recompute");
        let outcome = job.recompute(class).await;
        if !outcome.success {
            anyhow::bail!(outcome.message);
        }
        info!(class = %class, stats = ?outcome.stats, "{}", outcome.message);
        return Ok(());
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let schedules = if config.job.schedule_enabled {
        spawn_schedules(job.clone(), config.job.interval(), &shutdown_tx)
    } else {
        info!("Popularity schedule disabled; recompute only on request");
        Vec::new()
    };

    let data = web::Data::from(job);
    let port = config.service.http_port;

    info!("HTTP server listening on 0.0.0.0:{}", port);

    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .configure(handlers::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;

    info!("HTTP server stopped, shutting down schedules");
    let _ = shutdown_tx.send(());
    for handle in schedules {
        if let Err(e) = handle.await {
            error!(error = %e, "Schedule task panicked");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_once_flag() {
        assert_eq!(once_class(&args(&[])).unwrap(), None);
        assert_eq!(
            once_class(&args(&["--once", "reviews"])).unwrap(),
            Some(EntityClass::Review)
        );
        assert_eq!(
            once_class(&args(&["--once=manga"])).unwrap(),
            Some(EntityClass::Manga)
        );
        assert!(once_class(&args(&["--once"])).is_err());
        assert!(once_class(&args(&["--once", "novel"])).is_err());
    }
}
