//! Device acquisition ladder
//!
//! Tries an ordered list of acquisition strategies, each independently, and
//! returns the first source obtained or the last failure.

use super::traits::{AcquisitionFailure, CaptureConstraints, CaptureSource, MediaDevices};
use std::sync::Arc;

/// One rung of the acquisition ladder
#[derive(Debug, Clone)]
pub struct AcquisitionStrategy {
    pub name: &'static str,
    pub constraints: CaptureConstraints,
}

/// Result of running the ladder
pub enum Acquisition {
    Acquired {
        source: Box<dyn CaptureSource>,
        strategy: &'static str,
    },
    Failed(AcquisitionFailure),
}

impl std::fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Acquisition::Acquired { source, strategy } => {
                write!(f, "Acquired({}, via {})", source.descriptor().label, strategy)
            }
            Acquisition::Failed(failure) => write!(f, "Failed({})", failure),
        }
    }
}

/// Negotiates a live source with the platform
pub struct DeviceAcquirer {
    devices: Arc<dyn MediaDevices>,
    strategies: Vec<AcquisitionStrategy>,
}

impl DeviceAcquirer {
    /// Rear full-HD camera first, then any camera; both with audio
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self::with_strategies(
            devices,
            vec![
                AcquisitionStrategy {
                    name: "rear-high-resolution",
                    constraints: CaptureConstraints::rear_high_resolution(),
                },
                AcquisitionStrategy {
                    name: "any-camera",
                    constraints: CaptureConstraints::generic(),
                },
            ],
        )
    }

    pub fn with_strategies(
        devices: Arc<dyn MediaDevices>,
        strategies: Vec<AcquisitionStrategy>,
    ) -> Self {
        Self {
            devices,
            strategies,
        }
    }

    pub fn strategies(&self) -> &[AcquisitionStrategy] {
        &self.strategies
    }

    /// Run every strategy once, in order, stopping at the first success
    pub async fn acquire(&self) -> Acquisition {
        let mut last_failure =
            AcquisitionFailure::Other("no acquisition strategies configured".to_string());

        for strategy in &self.strategies {
            match self.devices.open(&strategy.constraints).await {
                Ok(source) => {
                    tracing::info!(
                        "Acquired capture source '{}' via {}",
                        source.descriptor().label,
                        strategy.name
                    );
                    return Acquisition::Acquired {
                        source,
                        strategy: strategy.name,
                    };
                }
                Err(failure) => {
                    tracing::warn!("Acquisition strategy {} failed: {}", strategy.name, failure);
                    last_failure = failure;
                }
            }
        }

        tracing::error!("Camera access failed: {}", last_failure);
        Acquisition::Failed(last_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::FacingMode;
    use crate::test_support::FakeDevices;

    #[tokio::test]
    async fn test_rear_camera_preferred() {
        let devices = Arc::new(FakeDevices::new().with_camera("Back Camera", Some(FacingMode::Environment)));
        let acquirer = DeviceAcquirer::new(devices.clone());

        match acquirer.acquire().await {
            Acquisition::Acquired { source, strategy } => {
                assert_eq!(strategy, "rear-high-resolution");
                assert!(!source.descriptor().is_generic());
            }
            other => panic!("expected a source, got {:?}", other),
        }
        assert_eq!(devices.open_attempts(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_any_camera() {
        let devices = Arc::new(FakeDevices::new().with_camera("USB Webcam", None));
        let acquirer = DeviceAcquirer::new(devices.clone());

        match acquirer.acquire().await {
            Acquisition::Acquired { source, strategy } => {
                assert_eq!(strategy, "any-camera");
                assert!(source.descriptor().is_generic());
            }
            other => panic!("expected a source, got {:?}", other),
        }
        assert_eq!(devices.open_attempts(), 2);
    }

    #[tokio::test]
    async fn test_reports_last_failure_after_two_attempts() {
        let devices = Arc::new(
            FakeDevices::new().deny_with(AcquisitionFailure::PermissionDenied(
                "user dismissed prompt".to_string(),
            )),
        );
        let acquirer = DeviceAcquirer::new(devices.clone());

        match acquirer.acquire().await {
            Acquisition::Failed(AcquisitionFailure::PermissionDenied(_)) => {}
            other => panic!("expected permission failure, got {:?}", other),
        }
        assert_eq!(devices.open_attempts(), 2);
    }

    #[tokio::test]
    async fn test_no_devices_is_not_found() {
        let devices = Arc::new(FakeDevices::new());
        let acquirer = DeviceAcquirer::new(devices);
        assert!(matches!(
            acquirer.acquire().await,
            Acquisition::Failed(AcquisitionFailure::NotFound(_))
        ));
    }
}
