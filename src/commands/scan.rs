use crate::analysis::health::count_by_category;
use crate::analysis::trend::{build_trend_series, compute_improvement, records_within};
use crate::commands::db::{HistoryStore, SqliteHistoryStore};
use crate::commands::detection::{CapturedImage, DetectionService, HttpDetectionClient};
use crate::commands::settings::{load_effective_scan_settings, EffectiveScanSettings};
use crate::error::ScanError;
use crate::models::detection::Detection;
use crate::models::profile::ProfileMeta;
use crate::models::scan_record::{
    HealthBand, LatestStats, ScanRecord, ScanReport, ScanState, TrendDirection,
};
use crate::models::trend::TrendSeries;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Entry point for the presentation layer: scan, history, trend and stats.
///
/// Collaborators are injected so screens never reach for ambient state.
/// One scan runs at a time per scanner.
pub struct SkinScanner {
    history: Arc<dyn HistoryStore>,
    detector: Arc<dyn DetectionService>,
    settings: EffectiveScanSettings,
    state: watch::Sender<ScanState>,
    in_flight: Mutex<()>,
}

impl SkinScanner {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        detector: Arc<dyn DetectionService>,
        settings: EffectiveScanSettings,
    ) -> Self {
        let (state, _) = watch::channel(ScanState::Idle);
        Self {
            history,
            detector,
            settings,
            state,
            in_flight: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &EffectiveScanSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> ScanState {
        self.state.borrow().clone()
    }

    pub async fn scan(&self, image: CapturedImage) -> Result<ScanReport, ScanError> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| ScanError::ScanInProgress)?;

        log::info!("scan started for {}", image.reference);
        self.state.send_replace(ScanState::Analyzing {
            image_reference: image.reference.clone(),
        });

        match self.run_scan(&image).await {
            Ok(report) => {
                log::info!(
                    "scan {} scored {} ({} detections, {} dropped)",
                    report.record.id,
                    report.record.health_score,
                    report.record.detections.len(),
                    report.dropped_detections
                );
                self.state.send_replace(ScanState::Completed {
                    record_id: report.record.id.clone(),
                    health_score: report.record.health_score,
                });
                Ok(report)
            }
            Err(err) => {
                if err.is_persistence() {
                    log::error!("scan result was not saved: {err}");
                } else {
                    log::warn!("scan failed: {err}");
                }
                self.state.send_replace(ScanState::Failed {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn run_scan(&self, image: &CapturedImage) -> Result<ScanReport, ScanError> {
        let response = self.detector.detect(image).await?;

        let (accepted, rejected): (Vec<Detection>, Vec<Detection>) = response
            .detections
            .into_iter()
            .partition(Detection::is_well_formed);
        for detection in &rejected {
            if let Err(issue) = detection.validate() {
                log::warn!("excluding {} detection: {issue}", detection.category);
            }
        }

        let health_score = self.settings.scoring.score(&accepted);
        let previous = self.history.read_latest()?;
        let improvement = compute_improvement(health_score, previous.as_ref());

        let record = ScanRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            image_reference: image.reference.clone(),
            detections: accepted,
            health_score,
            improvement,
        };

        self.history.append(&record)?;

        Ok(ScanReport {
            category_counts: count_by_category(&record.detections),
            record,
            dropped_detections: response.dropped + rejected.len(),
            reported_count: response.reported_count,
            annotated_image: response.annotated_image,
        })
    }

    pub fn get_history(&self) -> Result<Vec<ScanRecord>, ScanError> {
        Ok(self.history.read_all()?)
    }

    pub fn get_trend(&self) -> Result<TrendSeries, ScanError> {
        self.get_trend_at(chrono::Utc::now().timestamp())
    }

    pub fn get_trend_at(&self, now: i64) -> Result<TrendSeries, ScanError> {
        let mut records = self.history.read_all()?;
        records.reverse();
        let recent = records_within(&records, now, self.settings.trend_range_days);
        Ok(build_trend_series(&recent, self.settings.trend_granularity))
    }

    pub fn get_latest_stats(&self) -> Result<LatestStats, ScanError> {
        let records = self.history.read_all()?;
        let latest = records.first();

        Ok(LatestStats {
            health_score: latest.map(|r| r.health_score),
            improvement: latest.and_then(|r| r.improvement),
            band: latest.map(|r| HealthBand::from_score(r.health_score, &self.settings.thresholds)),
            direction: TrendDirection::from_improvement(latest.and_then(|r| r.improvement)),
            scan_count: records.len(),
            first_scan_at: records.last().map(|r| r.timestamp),
            last_scan_at: latest.map(|r| r.timestamp),
        })
    }
}

pub fn open_profile(data_dir: &str) -> Result<ProfileMeta, String> {
    let path = std::path::Path::new(data_dir);
    if !path.exists() {
        return Err("PATH_NOT_FOUND: Directory does not exist".to_string());
    }

    // Settings first so a fresh profile gets its defaults written.
    crate::commands::settings::load_settings_from_disk(data_dir)
        .map_err(|e| format!("INIT_FAILED: Could not initialize settings: {e}"))?;

    let store = SqliteHistoryStore::open(data_dir)
        .map_err(|e| format!("INIT_FAILED: Could not initialize database: {e}"))?;
    let scan_count = store
        .count()
        .map_err(|e| format!("DB_ERROR: Could not count scans: {e}"))?;
    let last_scan_at = store
        .last_scan_time()
        .map_err(|e| format!("DB_ERROR: Could not read last scan time: {e}"))?;

    log::info!("opened profile {data_dir} with {scan_count} scans");

    Ok(ProfileMeta {
        data_dir: data_dir.to_string(),
        scan_count,
        last_scan_at,
    })
}

pub fn build_scanner(data_dir: &str) -> Result<SkinScanner, ScanError> {
    let settings = load_effective_scan_settings(data_dir).map_err(ScanError::Settings)?;
    let history = SqliteHistoryStore::open(data_dir)?;
    let detector = HttpDetectionClient::from_settings(&settings)?;
    Ok(SkinScanner::new(
        Arc::new(history),
        Arc::new(detector),
        settings,
    ))
}

pub async fn scan_image(data_dir: &str, image_path: &str) -> Result<ScanReport, ScanError> {
    let scanner = build_scanner(data_dir)?;
    let image = CapturedImage::from_path(image_path).await?;
    scanner.scan(image).await
}

pub async fn get_scan_history(data_dir: &str) -> Result<Vec<ScanRecord>, ScanError> {
    build_scanner(data_dir)?.get_history()
}

pub async fn get_health_trend(data_dir: &str) -> Result<TrendSeries, ScanError> {
    build_scanner(data_dir)?.get_trend()
}

pub async fn get_latest_stats(data_dir: &str) -> Result<LatestStats, ScanError> {
    build_scanner(data_dir)?.get_latest_stats()
}
