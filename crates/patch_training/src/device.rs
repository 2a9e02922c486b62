//! Compute backend selection, checked against the hardware at run time.

use clap::ValueEnum;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceleratorStatus {
    pub available: bool,
    pub adapter_name: Option<String>,
}

impl AcceleratorStatus {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            adapter_name: None,
        }
    }
}

pub trait AcceleratorDetector {
    fn status(&self) -> AcceleratorStatus;
}

/// Reports no accelerator. Used when the crate is built without `backend-wgpu`.
pub struct NoAccelerator;

impl AcceleratorDetector for NoAccelerator {
    fn status(&self) -> AcceleratorStatus {
        AcceleratorStatus::unavailable()
    }
}

/// Asks wgpu for a default adapter.
#[cfg(feature = "backend-wgpu")]
pub struct WgpuDetector;

#[cfg(feature = "backend-wgpu")]
impl AcceleratorDetector for WgpuDetector {
    fn status(&self) -> AcceleratorStatus {
        let instance = wgpu::Instance::default();
        match pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
        {
            Some(adapter) => AcceleratorStatus {
                available: true,
                adapter_name: Some(adapter.get_info().name),
            },
            None => AcceleratorStatus::unavailable(),
        }
    }
}

pub fn platform_detector() -> Box<dyn AcceleratorDetector> {
    #[cfg(feature = "backend-wgpu")]
    {
        Box::new(WgpuDetector)
    }

    #[cfg(not(feature = "backend-wgpu"))]
    {
        Box::new(NoAccelerator)
    }
}

/// The backend a run actually uses. A missing accelerator is not fatal: it falls back to the CPU.
pub fn resolve_backend(
    requested: BackendKind,
    detector: &dyn AcceleratorDetector,
) -> BackendKind {
    choose_backend(requested, cfg!(feature = "backend-wgpu"), detector)
}

pub(crate) fn choose_backend(
    requested: BackendKind,
    built_wgpu: bool,
    detector: &dyn AcceleratorDetector,
) -> BackendKind {
    match (requested, built_wgpu) {
        (BackendKind::NdArray, _) => {
            tracing::info!("using the ndarray CPU backend");
            BackendKind::NdArray
        }
        (BackendKind::Wgpu, false) => {
            tracing::warn!(
                "backend-wgpu feature not enabled; falling back to the ndarray CPU backend"
            );
            BackendKind::NdArray
        }
        (BackendKind::Wgpu, true) => {
            let status = detector.status();
            tracing::info!(
                available = status.available,
                adapter = status.adapter_name.as_deref().unwrap_or("none"),
                "accelerator check"
            );
            if status.available {
                BackendKind::Wgpu
            } else {
                tracing::warn!("no WGPU adapter found; falling back to the ndarray CPU backend");
                BackendKind::NdArray
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAdapter(&'static str);

    impl AcceleratorDetector for FixedAdapter {
        fn status(&self) -> AcceleratorStatus {
            AcceleratorStatus {
                available: true,
                adapter_name: Some(self.0.to_string()),
            }
        }
    }

    struct Untouched;

    impl AcceleratorDetector for Untouched {
        fn status(&self) -> AcceleratorStatus {
            panic!("hardware must not be queried for a CPU request");
        }
    }

    #[test]
    fn built_with_wgpu_but_no_adapter_falls_back() {
        assert_eq!(
            choose_backend(BackendKind::Wgpu, true, &NoAccelerator),
            BackendKind::NdArray
        );
    }

    #[test]
    fn adapter_present_keeps_wgpu() {
        assert_eq!(
            choose_backend(BackendKind::Wgpu, true, &FixedAdapter("test gpu")),
            BackendKind::Wgpu
        );
    }

    #[test]
    fn missing_feature_falls_back_even_with_adapter() {
        assert_eq!(
            choose_backend(BackendKind::Wgpu, false, &FixedAdapter("test gpu")),
            BackendKind::NdArray
        );
    }

    #[test]
    fn cpu_request_skips_hardware_check() {
        assert_eq!(
            choose_backend(BackendKind::NdArray, true, &Untouched),
            BackendKind::NdArray
        );
    }
}
