use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Local, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::analytics::AnalyticsSink;
use crate::config::InvocationInput;
use crate::ledger::{partition_key, Ledger, LedgerStore};
use crate::notify::Notifier;
use crate::offer::Offer;
use crate::parse::{parse_page, Marketplace};
use crate::request::Fetcher;
use crate::text::excerpt;
use crate::{info_time, Error, Result, FETCH_EXCERPT_CHARS};

/// Summary of one completed run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub partition_key: String,
    pub total_offers: usize,
    pub new_offers: Vec<Offer>,
    pub evicted: usize,
    pub notified: bool,
    pub analytics_written: bool,
}

/// Fetch, extract, dedup against the ledger, then hand new offers on.
pub struct Ingestor {
    marketplace: Arc<Marketplace>,
    ledger_capacity: usize,
    fetcher: Box<dyn Fetcher>,
    store: Box<dyn LedgerStore>,
    notifier: Box<dyn Notifier>,
    analytics: Box<dyn AnalyticsSink>,
}

impl Ingestor {
    pub fn new(
        marketplace: Marketplace,
        ledger_capacity: usize,
        fetcher: Box<dyn Fetcher>,
        store: Box<dyn LedgerStore>,
        notifier: Box<dyn Notifier>,
        analytics: Box<dyn AnalyticsSink>,
    ) -> Self {
        Self {
            marketplace: Arc::new(marketplace),
            ledger_capacity,
            fetcher,
            store,
            notifier,
            analytics,
        }
    }

    pub async fn run(&self, input: &InvocationInput) -> Result<RunReport> {
        let start_time = Local::now();
        input.validate()?;
        let partition = partition_key(self.marketplace.source, &input.search_query);
        info_time!("Started run for partition {}", partition);

        let response = self.fetcher.fetch(&input.search_query).await?;
        if response.status >= 400 {
            let excerpt = excerpt(&response.body, FETCH_EXCERPT_CHARS);
            error!(status = response.status, %excerpt, "fetch failed");
            return Err(Error::Fetch {
                status: response.status,
                excerpt,
            });
        }

        let offers = parse_page(
            Arc::new(response.body),
            self.marketplace.clone(),
            Utc::now(),
        )
        .await?;

        let mut report = RunReport {
            partition_key: partition,
            total_offers: offers.len(),
            new_offers: Vec::new(),
            evicted: 0,
            notified: false,
            analytics_written: false,
        };
        if offers.is_empty() {
            info_time!(start_time, "No offers found, ledger untouched");
            return Ok(report);
        }

        let fingerprints: Vec<_> = offers.iter().map(Offer::fingerprint).collect();
        let mut ledger =
            Ledger::load(self.store.as_ref(), &report.partition_key, self.ledger_capacity).await?;
        let reconciliation = ledger.reconcile(fingerprints.iter().cloned());
        // Saved even without new offers, evictions still have to be persisted.
        ledger.save(self.store.as_ref()).await?;

        let fresh: HashSet<_> = reconciliation.fresh.iter().collect();
        let mut announced = HashSet::new();
        report.new_offers = offers
            .into_iter()
            .zip(fingerprints.iter())
            .filter(|(_, fp)| fresh.contains(fp) && announced.insert(*fp))
            .map(|(offer, _)| offer)
            .collect();
        report.evicted = reconciliation.evicted;
        info!(
            partition = %report.partition_key,
            offers = report.total_offers,
            new_offers = report.new_offers.len(),
            evicted = report.evicted,
            ledger = ledger.len(),
            "reconciled offers"
        );

        report.notified = self.notify(input, &report.new_offers).await?;

        if input.store_for_analytics && !report.new_offers.is_empty() {
            let prefix = input.analytics_prefix.clone().unwrap_or_else(|| {
                format!("{}/{}", self.marketplace.source, input.search_query)
            });
            match self.analytics.write(&prefix, &report.new_offers).await {
                Ok(_) => report.analytics_written = true,
                Err(e) => warn!(error = %e, %prefix, "analytics export failed"),
            }
        }

        info_time!(start_time, "Finished run for partition {}", report.partition_key);
        Ok(report)
    }

    /// Returns whether a notification went out.
    async fn notify(&self, input: &InvocationInput, new_offers: &[Offer]) -> Result<bool> {
        if new_offers.is_empty() {
            info!("no new offers, skipping notification");
            return Ok(false);
        }

        let destinations = input.notification_targets();
        if destinations.is_empty() {
            return Err(Error::EmptyDestination(new_offers.len()));
        }

        self.notifier.send(&destinations, new_offers).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::ledger::MemoryLedgerStore;
    use crate::request::FetchResponse;

    struct CannedFetcher {
        status: u16,
        body: String,
    }

    #[async_trait]
    impl Fetcher for CannedFetcher {
        async fn fetch(&self, _search_query: &str) -> Result<FetchResponse> {
            Ok(FetchResponse {
                status: self.status,
                body: self.body.clone(),
            })
        }
    }

    #[derive(Default, Clone)]
    struct Recorder {
        sent: Arc<Mutex<Vec<(Vec<String>, Vec<String>)>>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn send(&self, destinations: &[String], offers: &[Offer]) -> Result<()> {
            let ids = offers.iter().map(|o| o.id.clone()).collect();
            self.sent.lock().unwrap().push((destinations.to_vec(), ids));
            Ok(())
        }
    }

    #[async_trait]
    impl AnalyticsSink for Recorder {
        async fn write(&self, prefix: &str, offers: &[Offer]) -> Result<String> {
            if self.fail {
                return Err(Error::AnalyticsWrite("bucket unavailable".into()));
            }
            let ids = offers.iter().map(|o| o.id.clone()).collect();
            self.sent.lock().unwrap().push((vec![prefix.to_string()], ids));
            Ok(prefix.to_string())
        }
    }

    struct SharedStore(Arc<MemoryLedgerStore>);

    #[async_trait]
    impl LedgerStore for SharedStore {
        async fn get(&self, partition_key: &str) -> Result<Option<String>> {
            self.0.get(partition_key).await
        }
        async fn put(&self, partition_key: &str, value: String) -> Result<()> {
            self.0.put(partition_key, value).await
        }
    }

    struct UnavailableStore;

    #[async_trait]
    impl LedgerStore for UnavailableStore {
        async fn get(&self, _partition_key: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn put(&self, _partition_key: &str, _value: String) -> Result<()> {
            Err(Error::Store("down".into()))
        }
    }

    fn page(items: &[(&str, &str)]) -> String {
        let lis: String = items
            .iter()
            .map(|(id, price)| {
                format!(
                    r#"<li class="ad-listitem"><article class="aditem" data-adid="{id}" data-href="/s-anzeige/x/{id}">
                        <div class="aditem-main--middle">
                            <h2>Title {id}</h2>
                            <p class="aditem-main--middle--description">Desc {id}</p>
                            <div class="aditem-main--middle--price-shipping">{price}</div>
                        </div></article></li>"#
                )
            })
            .collect();
        format!(r#"<ul id="srchrslt-adtable">{lis}</ul>"#)
    }

    struct Harness {
        store: Arc<MemoryLedgerStore>,
        notifications: Recorder,
        exports: Recorder,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryLedgerStore::new()),
                notifications: Recorder::default(),
                exports: Recorder::default(),
            }
        }

        fn ingestor(&self, status: u16, body: String, capacity: usize) -> Ingestor {
            Ingestor::new(
                Marketplace::default(),
                capacity,
                Box::new(CannedFetcher { status, body }),
                Box::new(SharedStore(self.store.clone())),
                Box::new(self.notifications.clone()),
                Box::new(self.exports.clone()),
            )
        }

        async fn stored(&self) -> Option<String> {
            self.store.get("kleinanzeigen-s-nikon-z").await.unwrap()
        }

        fn notified(&self) -> Vec<(Vec<String>, Vec<String>)> {
            self.notifications.sent.lock().unwrap().clone()
        }
    }

    fn input(targets: &[&str]) -> InvocationInput {
        InvocationInput {
            search_query: "s-nikon-z".to_string(),
            notifications: Vec::new(),
            notification_targets: targets.iter().map(|t| t.to_string()).collect(),
            rate_in_minutes: None,
            store_for_analytics: false,
            analytics_prefix: None,
        }
    }

    #[tokio::test]
    async fn only_new_offers_are_notified() {
        let h = Harness::new();
        let body = page(&[("1", "5 €"), ("2", "6 €")]);

        let first = h.ingestor(200, body.clone(), 100).run(&input(&["a@example.com"])).await.unwrap();
        assert_eq!(first.new_offers.len(), 2);
        assert!(first.notified);

        let second = h.ingestor(200, body, 100).run(&input(&["a@example.com"])).await.unwrap();
        assert!(second.new_offers.is_empty());
        assert!(!second.notified);

        let notified = h.notified();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].0, ["a@example.com"]);
        assert_eq!(notified[0].1, ["1", "2"]);
    }

    #[tokio::test]
    async fn price_change_renotifies() {
        let h = Harness::new();
        h.ingestor(200, page(&[("1", "5 €")]), 100)
            .run(&input(&["a@example.com"]))
            .await
            .unwrap();
        let report = h
            .ingestor(200, page(&[("1", "4 € VB")]), 100)
            .run(&input(&["a@example.com"]))
            .await
            .unwrap();
        assert_eq!(report.new_offers.len(), 1);
        assert_eq!(report.new_offers[0].price, "4");
    }

    #[tokio::test]
    async fn fetch_error_leaves_ledger_untouched() {
        let h = Harness::new();
        let err = h
            .ingestor(503, "Service Unavailable".to_string(), 100)
            .run(&input(&["a@example.com"]))
            .await
            .unwrap_err();
        match err {
            Error::Fetch { status, excerpt } => {
                assert_eq!(status, 503);
                assert_eq!(excerpt, "Service Unavailable...");
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(h.stored().await, None);
        assert!(h.notified().is_empty());
    }

    #[tokio::test]
    async fn empty_body_fails_before_ledger() {
        let h = Harness::new();
        let err = h
            .ingestor(200, String::new(), 100)
            .run(&input(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyInput));
        assert_eq!(h.stored().await, None);
    }

    #[tokio::test]
    async fn zero_offers_skip_everything() {
        let h = Harness::new();
        let report = h
            .ingestor(200, "<html><body>nothing</body></html>".to_string(), 100)
            .run(&input(&[]))
            .await
            .unwrap();
        assert_eq!(report.total_offers, 0);
        assert_eq!(h.stored().await, None);
        assert!(h.notified().is_empty());
    }

    #[tokio::test]
    async fn new_offers_without_destinations_fail_after_saving() {
        let h = Harness::new();
        let err = h
            .ingestor(200, page(&[("1", "5 €")]), 100)
            .run(&input(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyDestination(1)));
        assert!(h.stored().await.is_some());
    }

    #[tokio::test]
    async fn no_new_offers_without_destinations_is_fine() {
        let h = Harness::new();
        let body = page(&[("1", "5 €")]);
        let _ = h.ingestor(200, body.clone(), 100).run(&input(&[])).await;
        let report = h.ingestor(200, body, 100).run(&input(&[])).await.unwrap();
        assert!(report.new_offers.is_empty());
        assert!(!report.notified);
    }

    #[tokio::test]
    async fn ledger_is_saved_and_bounded() {
        let h = Harness::new();
        h.ingestor(200, page(&[("1", "1 €"), ("2", "2 €"), ("3", "3 €")]), 3)
            .run(&input(&["a@example.com"]))
            .await
            .unwrap();
        let report = h
            .ingestor(200, page(&[("3", "3 €"), ("4", "4 €"), ("5", "5 €")]), 3)
            .run(&input(&["a@example.com"]))
            .await
            .unwrap();
        assert_eq!(report.evicted, 2);

        let stored = h.stored().await.unwrap();
        assert_eq!(stored.split('#').count(), 3);
        let ledger = Ledger::decode("kleinanzeigen-s-nikon-z", 3, &stored);
        for offer in &report.new_offers {
            assert!(ledger.contains(&offer.fingerprint()));
        }
    }

    #[tokio::test]
    async fn analytics_failure_is_not_fatal() {
        let mut h = Harness::new();
        h.exports.fail = true;
        let mut run_input = input(&["a@example.com"]);
        run_input.store_for_analytics = true;

        let report = h
            .ingestor(200, page(&[("1", "5 €")]), 100)
            .run(&run_input)
            .await
            .unwrap();
        assert!(report.notified);
        assert!(!report.analytics_written);
    }

    #[tokio::test]
    async fn analytics_uses_default_prefix() {
        let h = Harness::new();
        let mut run_input = input(&["a@example.com"]);
        run_input.store_for_analytics = true;

        let report = h
            .ingestor(200, page(&[("1", "5 €")]), 100)
            .run(&run_input)
            .await
            .unwrap();
        assert!(report.analytics_written);
        let exports = h.exports.sent.lock().unwrap().clone();
        assert_eq!(exports[0].0, ["kleinanzeigen/s-nikon-z"]);
        assert_eq!(exports[0].1, ["1"]);
    }

    #[tokio::test]
    async fn failed_save_stops_before_notifying() {
        let h = Harness::new();
        let mut run_input = input(&["a@example.com"]);
        run_input.store_for_analytics = true;

        let ingestor = Ingestor::new(
            Marketplace::default(),
            100,
            Box::new(CannedFetcher {
                status: 200,
                body: page(&[("1", "5 €")]),
            }),
            Box::new(UnavailableStore),
            Box::new(h.notifications.clone()),
            Box::new(h.exports.clone()),
        );

        let err = ingestor.run(&run_input).await.unwrap_err();
        assert!(matches!(err, Error::Store(ref msg) if msg == "down"));
        assert!(h.notified().is_empty());
        assert!(h.exports.sent.lock().unwrap().is_empty());
    }
}
