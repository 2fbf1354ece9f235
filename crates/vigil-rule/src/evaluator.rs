use crate::candidate::AlertCandidate;
use crate::model::AlertRule;
use crate::storage::RuleStorage;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use vigil_types::{MetricSample, Scope, Severity};

/// 单个（规则，单元）的滑动窗口状态
#[derive(Debug, Clone)]
struct WindowState {
    /// 窗口内的采样（时间，值）
    samples: VecDeque<(DateTime<Utc>, f64)>,

    /// 连续违反计数；非违反采样清零
    consecutive: u32,

    /// 最后一次发出候选的时间（冷却期起点）
    last_fired: Option<DateTime<Utc>>,

    /// 最后一次收到采样的时间
    last_sample_at: DateTime<Utc>,

    /// 是否已为当前静默期发出过 stale 元候选
    stale_alerted: bool,
}

impl WindowState {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            samples: VecDeque::new(),
            consecutive: 0,
            last_fired: None,
            last_sample_at: at,
            stale_alerted: false,
        }
    }
}

/// 规则评估器
///
/// 按（规则，单元）索引维护滑动窗口，采样到达时只评估匹配的规则，
/// 评估成本与活跃规则数成正比而不是与历史总量成正比。
pub struct RuleEvaluator {
    storage: Arc<RuleStorage>,
    windows: Arc<RwLock<HashMap<String, WindowState>>>,
}

impl RuleEvaluator {
    pub fn new(storage: Arc<RuleStorage>) -> Self {
        Self {
            storage,
            windows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 接收一个指标采样，返回触发的告警候选
    ///
    /// 冷却期内違反仍然推进窗口与计数，但抑制候选发出；
    /// 冷却期过后若仍处于违反状态，下一个违反采样立即再次发出候选。
    pub async fn ingest(&self, sample: &MetricSample) -> Vec<AlertCandidate> {
        let rules = self.storage.list_enabled().await;
        let mut candidates = Vec::new();

        let mut windows = self.windows.write().await;
        for rule in rules
            .iter()
            .filter(|r| r.matches(&sample.unit_id, &sample.metric))
        {
            let key = window_key(&rule.id, &sample.unit_id);
            let state = windows
                .entry(key)
                .or_insert_with(|| WindowState::new(sample.timestamp));

            state.last_sample_at = sample.timestamp;
            state.stale_alerted = false;

            // 推进窗口
            state.samples.push_back((sample.timestamp, sample.value));
            let horizon = sample.timestamp - Duration::seconds(rule.window_seconds as i64);
            while let Some((ts, _)) = state.samples.front() {
                if *ts < horizon {
                    state.samples.pop_front();
                } else {
                    break;
                }
            }

            if rule.operator.compare(sample.value, rule.threshold) {
                state.consecutive += 1;
            } else {
                state.consecutive = 0;
                continue;
            }

            if state.consecutive < rule.consecutive_violations {
                continue;
            }

            // 冷却期：抑制发出，窗口继续滑动
            if let Some(fired) = state.last_fired {
                let cooldown = Duration::minutes(rule.cooldown_minutes as i64);
                if sample.timestamp - fired < cooldown {
                    debug!(
                        rule_id = %rule.id,
                        unit_id = %sample.unit_id,
                        "Candidate suppressed by cooldown"
                    );
                    continue;
                }
            }

            state.last_fired = Some(sample.timestamp);
            self.storage.record_fired(&rule.id).await;

            let scope = Scope::unit(sample.unit_id.clone());
            info!(
                rule_id = %rule.id,
                unit_id = %sample.unit_id,
                value = sample.value,
                threshold = rule.threshold,
                "Alert candidate emitted"
            );
            candidates.push(AlertCandidate {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                fingerprint: AlertCandidate::fingerprint_for(&rule.id, &scope),
                scope,
                metric: rule.metric.clone(),
                severity: rule.severity,
                operator: rule.operator,
                threshold: rule.threshold,
                actual_value: sample.value,
                correction_rule_id: rule.correction_rule_id.clone(),
                occurred_at: sample.timestamp,
            });
        }

        candidates
    }

    /// 陈旧指标检测
    ///
    /// 某个已被观察过的（规则，单元）超过 2 倍评估窗口没有任何采样时,
    /// 发出一个警告级别的元候选，而不是静默失效。
    /// 采样缺失本身不构成规则违反。
    pub async fn check_staleness(&self, now: DateTime<Utc>) -> Vec<AlertCandidate> {
        let rules: HashMap<String, AlertRule> = self
            .storage
            .list_enabled()
            .await
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        let mut candidates = Vec::new();
        let mut windows = self.windows.write().await;

        for (key, state) in windows.iter_mut() {
            let Some((rule_id, unit_id)) = key.split_once('\u{1f}') else {
                continue;
            };
            let Some(rule) = rules.get(rule_id) else {
                continue;
            };

            let silence = now - state.last_sample_at;
            let limit = Duration::seconds(2 * rule.window_seconds as i64);
            if silence <= limit || state.stale_alerted {
                continue;
            }
            state.stale_alerted = true;

            let scope = Scope::unit(unit_id);
            info!(
                rule_id = %rule.id,
                unit_id = %unit_id,
                silent_seconds = silence.num_seconds(),
                "Stale metrics detected"
            );
            candidates.push(AlertCandidate {
                rule_id: rule.id.clone(),
                rule_name: format!("stale metrics for {}", rule.name),
                fingerprint: format!("stale:{}:{}", rule.id, scope.key()),
                scope,
                metric: rule.metric.clone(),
                severity: Severity::Warning,
                operator: rule.operator,
                threshold: limit.num_seconds() as f64,
                actual_value: silence.num_seconds() as f64,
                correction_rule_id: None,
                occurred_at: now,
            });
        }

        candidates
    }

    /// 当前追踪的窗口数（监控用）
    pub async fn window_count(&self) -> usize {
        self.windows.read().await.len()
    }
}

fn window_key(rule_id: &str, unit_id: &str) -> String {
    // 0x1f 作为分隔符，避免规则/单元 ID 中的冒号造成歧义
    format!("{}\u{1f}{}", rule_id, unit_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::ComparisonOperator;

    fn error_rate_rule() -> AlertRule {
        AlertRule {
            id: "rule-1".to_string(),
            name: "high_error_rate".to_string(),
            metric: "error_rate".to_string(),
            unit_selector: "svc-A".to_string(),
            operator: ComparisonOperator::GreaterThan,
            threshold: 0.05,
            window_seconds: 300,
            consecutive_violations: 3,
            cooldown_minutes: 15,
            ..Default::default()
        }
    }

    async fn evaluator_with(rule: AlertRule) -> RuleEvaluator {
        let storage = Arc::new(RuleStorage::new());
        storage.save(rule).await.unwrap();
        RuleEvaluator::new(storage)
    }

    fn sample_at(base: DateTime<Utc>, offset_minutes: i64, value: f64) -> MetricSample {
        MetricSample::new("svc-A", "error_rate", value).at(base + Duration::minutes(offset_minutes))
    }

    #[tokio::test]
    async fn test_consecutive_violations_then_fire() {
        let evaluator = evaluator_with(error_rate_rule()).await;
        let t0 = Utc::now();

        assert!(evaluator.ingest(&sample_at(t0, 0, 0.1)).await.is_empty());
        assert!(evaluator.ingest(&sample_at(t0, 1, 0.2)).await.is_empty());

        let fired = evaluator.ingest(&sample_at(t0, 2, 0.06)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].actual_value, 0.06);
        assert_eq!(fired[0].fingerprint, "rule-1:svc-A");
    }

    #[tokio::test]
    async fn test_non_violation_resets_counter() {
        let evaluator = evaluator_with(error_rate_rule()).await;
        let t0 = Utc::now();

        evaluator.ingest(&sample_at(t0, 0, 0.1)).await;
        evaluator.ingest(&sample_at(t0, 1, 0.2)).await;
        // 恢复正常，计数清零
        evaluator.ingest(&sample_at(t0, 2, 0.01)).await;
        assert!(evaluator.ingest(&sample_at(t0, 3, 0.2)).await.is_empty());
        assert!(evaluator.ingest(&sample_at(t0, 4, 0.2)).await.is_empty());
        assert_eq!(evaluator.ingest(&sample_at(t0, 5, 0.2)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_then_refires() {
        let evaluator = evaluator_with(error_rate_rule()).await;
        let t0 = Utc::now();

        evaluator.ingest(&sample_at(t0, 0, 0.1)).await;
        evaluator.ingest(&sample_at(t0, 1, 0.2)).await;
        assert_eq!(evaluator.ingest(&sample_at(t0, 2, 0.06)).await.len(), 1);

        // 冷却期内的第 4 个违反采样被抑制
        assert!(evaluator.ingest(&sample_at(t0, 3, 0.2)).await.is_empty());

        // 冷却期（15 分钟）过后仍在违反，再次发出候选
        assert_eq!(evaluator.ingest(&sample_at(t0, 18, 0.2)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_scope_isolation() {
        let mut rule = error_rate_rule();
        rule.unit_selector = "*".to_string();
        let evaluator = evaluator_with(rule).await;
        let t0 = Utc::now();

        evaluator.ingest(&sample_at(t0, 0, 0.2)).await;
        evaluator.ingest(&sample_at(t0, 1, 0.2)).await;

        // 另一个单元的违反不影响 svc-A 的计数
        let other = MetricSample::new("svc-B", "error_rate", 0.2).at(t0 + Duration::minutes(1));
        assert!(evaluator.ingest(&other).await.is_empty());

        let fired = evaluator.ingest(&sample_at(t0, 2, 0.2)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].scope.unit_id, "svc-A");
    }

    #[tokio::test]
    async fn test_staleness_meta_candidate() {
        let evaluator = evaluator_with(error_rate_rule()).await;
        let t0 = Utc::now();

        evaluator.ingest(&sample_at(t0, 0, 0.01)).await;

        // 2 倍窗口（600 秒）内不算陈旧
        assert!(evaluator
            .check_staleness(t0 + Duration::seconds(500))
            .await
            .is_empty());

        let stale = evaluator
            .check_staleness(t0 + Duration::seconds(700))
            .await;
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].severity, Severity::Warning);
        assert!(stale[0].fingerprint.starts_with("stale:"));

        // 同一静默期不重复发出
        assert!(evaluator
            .check_staleness(t0 + Duration::seconds(800))
            .await
            .is_empty());

        // 新采样到达后恢复检测
        evaluator.ingest(&sample_at(t0, 20, 0.01)).await;
        let stale = evaluator
            .check_staleness(t0 + Duration::minutes(20) + Duration::seconds(700))
            .await;
        assert_eq!(stale.len(), 1);
    }
}
