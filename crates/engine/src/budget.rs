//! Device resource accounting.
//!
//! Units are MiB of device memory. Availability is always read fresh from the
//! probe because other processes may share the device.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use scenecraft_core::ModelClass;

/// Kind of compute device behind the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Gpu,
    Cpu,
}

/// Static description of the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapacity {
    pub kind: DeviceKind,
    pub name: String,
    pub total_units: u64,
}

pub trait DeviceProbe: Send + Sync + 'static {
    fn capacity(&self) -> DeviceCapacity;

    /// Currently free units. Called before every attempt.
    fn available_units(&self) -> u64;
}

/// Probe reporting a fixed capacity (CPU hosts, tests).
#[derive(Debug, Clone)]
pub struct StaticDeviceProbe {
    capacity: DeviceCapacity,
}

impl StaticDeviceProbe {
    pub fn new(kind: DeviceKind, name: impl Into<String>, total_units: u64) -> Self {
        Self {
            capacity: DeviceCapacity {
                kind,
                name: name.into(),
                total_units,
            },
        }
    }

    pub fn cpu() -> Self {
        Self::new(DeviceKind::Cpu, "cpu", 0)
    }
}

impl DeviceProbe for StaticDeviceProbe {
    fn capacity(&self) -> DeviceCapacity {
        self.capacity.clone()
    }

    fn available_units(&self) -> u64 {
        match self.capacity.kind {
            // Host memory is not the constraint the estimate models.
            DeviceKind::Cpu => u64::MAX,
            DeviceKind::Gpu => self.capacity.total_units,
        }
    }
}

/// Snapshot for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetSnapshot {
    pub device: DeviceCapacity,
    pub available_units: u64,
    pub recommended_model: ModelClass,
}

/// Availability of one model on this device.
#[derive(Debug, Clone, Serialize)]
pub struct ModelAvailability {
    pub id: &'static str,
    pub name: &'static str,
    pub min_memory_mib: u64,
    /// Largest edge the model is tuned for.
    pub max_size: u32,
    pub available: bool,
    pub recommended: bool,
}

#[derive(Clone)]
pub struct ResourceBudgetTracker {
    probe: Arc<dyn DeviceProbe>,
}

impl std::fmt::Debug for ResourceBudgetTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceBudgetTracker")
            .field("device", &self.probe.capacity())
            .finish()
    }
}

impl ResourceBudgetTracker {
    pub fn new(probe: Arc<dyn DeviceProbe>) -> Self {
        Self { probe }
    }

    /// Estimated units for one attempt: resident weights plus activations
    /// proportional to output pixel count.
    pub fn estimate(&self, width: u32, height: u32, model: ModelClass) -> u64 {
        let profile = model.profile();
        let pixels = u64::from(width) * u64::from(height);
        profile.weights_mib + pixels * profile.mib_per_megapixel / 1_000_000
    }

    pub fn available(&self) -> u64 {
        self.probe.available_units()
    }

    pub fn fits(&self, width: u32, height: u32, model: ModelClass) -> bool {
        self.estimate(width, height, model) <= self.available()
    }

    pub fn capacity(&self) -> DeviceCapacity {
        self.probe.capacity()
    }

    pub fn recommended_model(&self) -> ModelClass {
        let cap = self.probe.capacity();
        match cap.kind {
            DeviceKind::Gpu => ModelClass::recommended_for(cap.total_units),
            DeviceKind::Cpu => ModelClass::Sd15,
        }
    }

    pub fn models(&self) -> Vec<ModelAvailability> {
        let cap = self.probe.capacity();
        let recommended = self.recommended_model();
        ModelClass::ALL
            .into_iter()
            .map(|m| {
                let p = m.profile();
                ModelAvailability {
                    id: m.id(),
                    name: p.name,
                    min_memory_mib: p.min_memory_mib,
                    max_size: p.max_size,
                    available: cap.kind == DeviceKind::Cpu || cap.total_units >= p.min_memory_mib,
                    recommended: m == recommended,
                }
            })
            .collect()
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            device: self.probe.capacity(),
            available_units: self.available(),
            recommended_model: self.recommended_model(),
        }
    }
}
