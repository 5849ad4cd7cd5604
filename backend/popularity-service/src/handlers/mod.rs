use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::error::PopularityError;
use crate::jobs::PopularityJob;
use crate::metrics::serve_metrics;
use crate::models::EntityClass;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": "popularity-service",
    }))
}

/// Trigger a recompute and wait for it to finish
pub async fn recompute(
    job: web::Data<PopularityJob>,
    path: web::Path<String>,
) -> Result<HttpResponse, PopularityError> {
    let class: EntityClass = path.into_inner().parse()?;

    tracing::info!(class = %class, "Recompute requested over HTTP");

    let outcome = job.execute(class).await?;
    if outcome.success {
        Ok(HttpResponse::Ok().json(outcome))
    } else {
        Ok(HttpResponse::InternalServerError().json(outcome))
    }
}

/// Current pipeline state and the cached outcome of the last run
pub async fn run_status(
    job: web::Data<PopularityJob>,
    path: web::Path<String>,
) -> Result<HttpResponse, PopularityError> {
    let class: EntityClass = path.into_inner().parse()?;
    let last_run = job.last_outcome(class).await;

    Ok(HttpResponse::Ok().json(json!({
        "class": class,
        "state": job.current_state(class),
        "last_run": last_run,
    })))
}

pub async fn job_stats(job: web::Data<PopularityJob>) -> Result<HttpResponse, PopularityError> {
    let stats = job.get_job_stats().await?;
    Ok(HttpResponse::Ok().json(stats))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(serve_metrics))
        .service(
            web::scope("/api/v1/popularity")
                .route("/stats", web::get().to(job_stats))
                .route("/{class}/recompute", web::post().to(recompute))
                .route("/{class}/status", web::get().to(run_status)),
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PopularityCache;
    use crate::db::MemoryStore;
    use crate::jobs::JobSettings;
    use crate::models::{ReviewSignals, Signals};
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;

    async fn job_with_reviews(views: &[i64]) -> (Arc<MemoryStore>, web::Data<PopularityJob>) {
        let store = Arc::new(MemoryStore::new());
        for (id, total_views) in (1..).zip(views) {
            store
                .upsert_signals(
                    EntityClass::Review,
                    id,
                    Signals::Review(ReviewSignals {
                        total_views: *total_views,
                        ..Default::default()
                    }),
                )
                .await;
        }

        let job = PopularityJob::new(
            store.clone(),
            store.clone(),
            PopularityCache::disabled(),
            JobSettings::default(),
        );
        (store, web::Data::new(job))
    }

    #[actix_web::test]
    async fn test_health() {
        let app = test::init_service(App::new().configure(configure)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_recompute_reviews() {
        let (store, job) = job_with_reviews(&[10, 100, 50]).await;
        let app =
            test::init_service(App::new().app_data(job.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/popularity/reviews/recompute")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["success"], true);
        assert_eq!(body["class"], "review");
        assert_eq!(body["stats"]["total"], 3);
        assert_eq!(body["stats"]["errors"], 0);
        assert_eq!(body["top10"][0]["id"], 2);
        assert_eq!(body["top10"][0]["variation"], "NEW");
        assert_eq!(store.entity(EntityClass::Review, 1).await.unwrap().rank, 3);
    }

    #[actix_web::test]
    async fn test_unknown_class_is_bad_request() {
        let (_, job) = job_with_reviews(&[]).await;
        let app = test::init_service(App::new().app_data(job).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/popularity/novels/recompute")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_failed_run_reports_failure() {
        let (store, job) = job_with_reviews(&[5]).await;
        store.set_fail_reads(true).await;
        let app = test::init_service(App::new().app_data(job).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/popularity/anime/recompute")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["stats"].is_null());
    }

    #[actix_web::test]
    async fn test_stats_and_status() {
        let (_, job) = job_with_reviews(&[30, 20]).await;
        job.recompute_review_rankings().await;
        let app = test::init_service(App::new().app_data(job).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri("/api/v1/popularity/stats")
            .to_request();
        let stats: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stats["total_reviews"], 2);
        assert_eq!(stats["reviews_with_score"], 2);
        assert_eq!(stats["coverage_percent"], 100.0);
        assert_eq!(stats["top10"][0]["id"], 1);

        let req = test::TestRequest::get()
            .uri("/api/v1/popularity/review/status")
            .to_request();
        let status: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status["state"], "done");
        assert_eq!(status["last_run"]["success"], true);
        assert_eq!(status["last_run"]["stats"]["total"], 2);

        let req = test::TestRequest::get()
            .uri("/api/v1/popularity/anime/status")
            .to_request();
        let status: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status["state"], "idle");
        assert!(status["last_run"].is_null());
    }
}
