#[cfg(test)]
mod tests {
    use crate::error::CheckError;
    use crate::health::{Check, CheckResult, ExternalServices, FixedClock, Providers, StatusProvider};
    use chrono::{Local, TimeZone};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Answers with a configurable body and records how often and how
    /// concurrently it was called.
    struct MockProvider {
        text: Mutex<String>,
        delay: Duration,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl MockProvider {
        fn new(text: &str) -> Self {
            Self::with_delay(text, Duration::ZERO)
        }

        fn with_delay(text: &str, delay: Duration) -> Self {
            Self {
                text: Mutex::new(text.to_string()),
                delay,
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        fn set_text(&self, text: &str) {
            *self.text.lock() = text.to_string();
        }
    }

    #[async_trait::async_trait]
    impl StatusProvider for MockProvider {
        async fn status(&self, check: &Check) -> Result<CheckResult, CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if check.url.contains("fail") {
                return Err(CheckError::Transport("connection refused".to_string()));
            }
            if check.url.contains("panic") {
                panic!("provider blew up");
            }
            if check.url.contains("slow") {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }

            let mut body = crate::health::Body::new();
            body.insert("text".to_string(), json!(self.text.lock().clone()));
            Ok(CheckResult::ok(&check.name)
                .with_body(body)
                .with_response_time(Duration::from_secs(999)))
        }
    }

    fn providers_with(provider: Arc<MockProvider>) -> Providers {
        Providers {
            http: provider.clone(),
            mongo: provider.clone(),
            docker: provider.clone(),
            program: provider.clone(),
            nginx: provider.clone(),
            certificate: provider.clone(),
            file: provider.clone(),
            rmq: provider,
        }
    }

    fn local(h: u32, m: u32, s: u32) -> chrono::DateTime<Local> {
        Local.with_ymd_and_hms(2023, 1, 1, h, m, s).single().unwrap()
    }

    fn names(results: &[CheckResult]) -> Vec<&str> {
        results.iter().map(|r| r.name.as_str()).collect()
    }

    fn text(result: &CheckResult) -> String {
        result.body.as_ref().unwrap()["text"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_results_sorted_by_name() {
        let mock = Arc::new(MockProvider::new("ok"));
        let services = ExternalServices::new(
            providers_with(mock.clone()),
            4,
            Duration::from_secs(1),
            &["s3:http://c", "s1:http://a", "s2:http://b", "broken"],
        );

        let results = services.status().await;
        assert_eq!(names(&results), vec!["s1", "s2", "s3"]);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 3);
        assert!(results.iter().all(|r| r.status_code == 200));
        assert!(results.iter().all(|r| r.response_time_ms < 999_000));
    }

    #[tokio::test]
    async fn test_empty_declarations() {
        let mock = Arc::new(MockProvider::new("ok"));
        let services = ExternalServices::new::<&str>(providers_with(mock), 4, Duration::from_secs(1), &[]);
        assert!(services.status().await.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let mock = Arc::new(MockProvider::new("ok"));
        let services = ExternalServices::new(
            providers_with(mock),
            2,
            Duration::from_secs(1),
            &["a:http://ok", "b:http://fail", "c:ftp://nope", "d:http://panic"],
        );

        let results = services.status().await;
        assert_eq!(names(&results), vec!["a", "b", "c", "d"]);
        assert_eq!(results[0].status_code, 200);
        for failed in &results[1..] {
            assert_eq!(failed.status_code, 500);
            assert!(failed.body.is_none());
        }
    }

    #[tokio::test]
    async fn test_failures_are_cached() {
        let mock = Arc::new(MockProvider::new("ok"));
        let services = ExternalServices::new(providers_with(mock), 2, Duration::from_secs(1), &["b:http://fail"]);

        services.status().await;
        let cached = services.cache().get(&Check::new("b", "http://fail")).unwrap();
        assert_eq!(cached.status_code, 500);
    }

    #[tokio::test]
    async fn test_timeout_does_not_block_siblings() {
        let mock = Arc::new(MockProvider::new("ok"));
        let services = ExternalServices::new(
            providers_with(mock),
            4,
            Duration::from_millis(200),
            &["fast:http://ok", "slow:http://slow"],
        );

        let start = Instant::now();
        let results = services.status().await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(names(&results), vec!["fast", "slow"]);
        assert_eq!(results[0].status_code, 200);
        assert_eq!(results[1].status_code, 500);
        assert!(results[1].response_time_ms >= 200);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mock = Arc::new(MockProvider::with_delay("ok", Duration::from_millis(50)));
        let declarations: Vec<String> = (0..10).map(|i| format!("s{}:http://host/{}", i, i)).collect();
        let services = ExternalServices::new(providers_with(mock.clone()), 3, Duration::from_secs(5), &declarations);

        let results = services.status().await;
        assert_eq!(results.len(), 10);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 10);
        let max_active = mock.max_active.load(Ordering::SeqCst);
        assert!(max_active <= 3, "max active was {}", max_active);
        assert!(max_active >= 1);
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_runs() {
        let mock = Arc::new(MockProvider::new("ok"));
        let services = ExternalServices::new(providers_with(mock), 0, Duration::from_secs(1), &["a:http://ok"]);
        assert_eq!(services.status().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_cron_runs_check() {
        let mock = Arc::new(MockProvider::new("ok"));
        let clock = Arc::new(FixedClock::new(local(12, 30, 0)));
        let services = ExternalServices::new(
            providers_with(mock.clone()),
            2,
            Duration::from_secs(1),
            &["s1:http://127.0.0.1/health?cron=invalid"],
        )
        .with_clock(clock);

        let results = services.status().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status_code, 200);
    }

    #[tokio::test]
    async fn test_cron_gate_with_cache() {
        let mock = Arc::new(MockProvider::new("first"));
        let clock = Arc::new(FixedClock::new(local(11, 59, 59)));
        let declarations = [
            "s1:http://127.0.0.1/health?cron=0 12 * * *",
            "s2:http://127.0.0.1/ping?cron=*/5_*_*_*_*",
            "s4:http://127.0.0.1/status",
        ];
        let services = ExternalServices::new(providers_with(mock.clone()), 4, Duration::from_secs(1), &declarations)
            .with_clock(clock.clone());

        let results = services.status().await;
        assert_eq!(names(&results), vec!["s1", "s2", "s4"]);
        assert!(results.iter().all(|r| text(r) == "first"));

        mock.set_text("second");
        clock.advance(chrono::Duration::minutes(1));
        let results = services.status().await;
        assert_eq!(names(&results), vec!["s1", "s2", "s4"]);
        assert_eq!(text(&results[0]), "first");
        assert_eq!(text(&results[1]), "first");
        assert_eq!(text(&results[2]), "second");

        clock.set(local(12, 4, 59));
        let results = services.status().await;
        assert_eq!(names(&results), vec!["s1", "s2", "s4"]);
        assert_eq!(text(&results[0]), "first");
        assert_eq!(text(&results[1]), "second");
        assert_eq!(text(&results[2]), "second");

        let stats = services.cache().stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.writes, 6);
        assert_eq!(stats.current_size, 3);
    }

    #[tokio::test]
    async fn test_cron_skip_without_cache_omits_check() {
        let mock = Arc::new(MockProvider::new("ok"));
        let clock = Arc::new(FixedClock::new(local(12, 0, 59)));
        let declarations = [
            "s1:http://127.0.0.1/health?cron=0 12 * * *",
            "s2:http://127.0.0.1/ping?cron=*/5_*_*_*_*",
            "s4:http://127.0.0.1/status",
        ];
        let services = ExternalServices::new(providers_with(mock.clone()), 4, Duration::from_secs(1), &declarations)
            .with_clock(clock);

        let results = services.status().await;
        assert_eq!(names(&results), vec!["s4"]);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
        assert_eq!(services.cache().stats().misses, 2);
    }
}
