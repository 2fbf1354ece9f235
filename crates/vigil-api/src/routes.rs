use crate::handlers::{
    alerts, corrections, ingest, policies, recovery, rules, stats, subscribers, AppState,
};
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // 上报
        .route("/api/v1/metrics", post(ingest::report_metric))
        .route("/api/v1/crashes", post(ingest::report_crash))
        // 告警
        .route("/api/v1/alerts", get(alerts::list_alerts))
        .route("/api/v1/alerts/:alert_id", get(alerts::get_alert))
        .route(
            "/api/v1/alerts/:alert_id/escalations",
            get(alerts::get_alert_escalations),
        )
        .route(
            "/api/v1/alerts/:alert_id/acknowledge",
            post(alerts::acknowledge_alert),
        )
        .route("/api/v1/alerts/:alert_id/resolve", post(alerts::resolve_alert))
        .route(
            "/api/v1/alerts/:alert_id/annotations",
            post(alerts::annotate_alert),
        )
        // 告警规则
        .route("/api/v1/rules", post(rules::create_rule))
        .route("/api/v1/rules", get(rules::list_rules))
        .route("/api/v1/rules/:rule_id", get(rules::get_rule))
        .route("/api/v1/rules/:rule_id", put(rules::update_rule))
        .route("/api/v1/rules/:rule_id", delete(rules::delete_rule))
        // 升级策略
        .route("/api/v1/policies", post(policies::create_policy))
        .route("/api/v1/policies", get(policies::list_policies))
        .route("/api/v1/policies/:policy_id", get(policies::get_policy))
        .route("/api/v1/policies/:policy_id", delete(policies::delete_policy))
        // 订阅者
        .route("/api/v1/subscribers", post(subscribers::create_subscriber))
        .route("/api/v1/subscribers", get(subscribers::list_subscribers))
        .route(
            "/api/v1/subscribers/:subscriber_id",
            get(subscribers::get_subscriber),
        )
        .route(
            "/api/v1/subscribers/:subscriber_id",
            delete(subscribers::delete_subscriber),
        )
        // 通知投递
        .route("/api/v1/notifications", get(stats::list_notifications))
        // 纠正
        .route(
            "/api/v1/corrections/rules",
            post(corrections::create_correction_rule),
        )
        .route(
            "/api/v1/corrections/rules",
            get(corrections::list_correction_rules),
        )
        .route(
            "/api/v1/corrections/rules/:rule_id",
            get(corrections::get_correction_rule),
        )
        .route(
            "/api/v1/corrections/rules/:rule_id",
            delete(corrections::delete_correction_rule),
        )
        .route(
            "/api/v1/corrections/rules/:rule_id/auto",
            post(corrections::set_correction_auto_enabled),
        )
        .route(
            "/api/v1/corrections/rules/:rule_id/success_rate",
            get(corrections::correction_success_rate),
        )
        .route("/api/v1/corrections/logs", get(corrections::list_correction_logs))
        // 恢复
        .route("/api/v1/recovery/procedures", post(recovery::create_procedure))
        .route("/api/v1/recovery/procedures", get(recovery::list_procedures))
        .route(
            "/api/v1/recovery/procedures/:procedure_id",
            get(recovery::get_procedure),
        )
        .route(
            "/api/v1/recovery/procedures/:procedure_id",
            delete(recovery::delete_procedure),
        )
        .route("/api/v1/recovery/crashes", get(recovery::list_crashes))
        .route("/api/v1/recovery/executions", get(recovery::list_executions))
        .route(
            "/api/v1/recovery/executions/pending",
            get(recovery::list_pending_approvals),
        )
        .route(
            "/api/v1/recovery/executions/:execution_id",
            get(recovery::get_execution),
        )
        .route(
            "/api/v1/recovery/executions/:execution_id/approve",
            post(recovery::approve_execution),
        )
        .route(
            "/api/v1/recovery/executions/:execution_id/reject",
            post(recovery::reject_execution),
        )
        // 统计
        .route("/api/v1/stats/daily", get(stats::daily_summary))
        .route("/api/v1/stats/monthly", get(stats::monthly_summary))
        .route("/metrics", get(stats::export_metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
