// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Per-port curve selection shared between the control thread and the
//! operator-facing side.
//!
//! The table is immutable once published. Edits clone it, modify the copy
//! and swap the `Arc`, so a tick that grabbed a snapshot keeps a
//! consistent view for every port.

use crate::config::Config;
use crate::curve::{BuiltInProfile, CurvePoint, FanCurve, Profile};
use crate::error::CurveError;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// One published version of the curve assignments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurveTable {
    profile: BuiltInProfile,
    custom: BTreeMap<u8, Arc<FanCurve>>,
}

impl CurveTable {
    pub fn new(profile: BuiltInProfile) -> Self {
        Self {
            profile,
            custom: BTreeMap::new(),
        }
    }

    /// Build from the persisted config. Custom curves are taken as-is; a
    /// broken one falls back to the profile when it is evaluated.
    pub fn from_config(config: &Config) -> Self {
        let mut table = Self::new(config.profile);
        for port in &config.ports {
            if let Some(points) = &port.custom_curve {
                let curve = custom_curve(port.id, points.clone());
                if let Err(e) = curve.validate() {
                    log::warn!(
                        "Port {}: stored custom curve is invalid ({e}), {} profile will be used",
                        port.id,
                        config.profile
                    );
                }
                table.custom.insert(port.id, Arc::new(curve));
            }
        }
        table
    }

    pub fn profile(&self) -> BuiltInProfile {
        self.profile
    }

    /// The port's custom curve if one is set, else the selected profile.
    pub fn resolve(&self, port: u8) -> Profile {
        match self.custom.get(&port) {
            Some(curve) => Profile::Custom(curve.clone()),
            None => Profile::BuiltIn(self.profile),
        }
    }

    pub fn custom(&self, port: u8) -> Option<&Arc<FanCurve>> {
        self.custom.get(&port)
    }

    /// Copy profile and custom curves into `config` for saving.
    pub fn write_to(&self, config: &mut Config) {
        config.profile = self.profile;
        for port in &mut config.ports {
            port.custom_curve = self.custom.get(&port.id).map(|c| c.points.clone());
        }
    }
}

/// Shared handle to the current [`CurveTable`].
#[derive(Debug, Default)]
pub struct CurveStore {
    current: RwLock<Arc<CurveTable>>,
}

impl CurveStore {
    pub fn new(table: CurveTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    /// The table in effect right now.
    pub fn snapshot(&self) -> Arc<CurveTable> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn select_profile(&self, profile: BuiltInProfile) {
        self.update(|t| t.profile = profile);
    }

    /// Install a validated custom curve on a port.
    pub fn set_custom(&self, port: u8, points: Vec<CurvePoint>) -> Result<(), CurveError> {
        let curve = custom_curve(port, points);
        curve.validate()?;
        let curve = Arc::new(curve);
        self.update(|t| {
            t.custom.insert(port, curve);
        });
        Ok(())
    }

    /// Drop a port's custom curve. Returns whether one was set.
    pub fn clear_custom(&self, port: u8) -> bool {
        self.update(|t| t.custom.remove(&port).is_some())
    }

    /// Give every port in `ports` the curve currently used by `source`.
    pub fn apply_to_all(&self, source: u8, ports: &[u8]) {
        self.update(|t| {
            let points = t.resolve(source).curve().points.clone();
            for &port in ports {
                t.custom
                    .insert(port, Arc::new(custom_curve(port, points.clone())));
            }
        });
    }

    /// Drop every custom curve.
    pub fn reset(&self) {
        self.update(|t| t.custom.clear());
    }

    /// Swap in a whole new table, e.g. after a config reload.
    pub fn replace(&self, table: CurveTable) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
    }

    fn update<R>(&self, edit: impl FnOnce(&mut CurveTable) -> R) -> R {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = CurveTable::clone(&guard);
        let result = edit(&mut next);
        *guard = Arc::new(next);
        result
    }
}

fn custom_curve(port: u8, points: Vec<CurvePoint>) -> FanCurve {
    FanCurve::new(format!("Port {port} custom"), points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortConfig;

    fn points() -> Vec<CurvePoint> {
        vec![CurvePoint::new(20, 600), CurvePoint::new(80, 1800)]
    }

    #[test]
    fn test_resolves_profile_then_custom() {
        let store = CurveStore::new(CurveTable::new(BuiltInProfile::Quiet));
        assert_eq!(
            store.snapshot().resolve(2),
            Profile::BuiltIn(BuiltInProfile::Quiet)
        );

        store.set_custom(2, points()).unwrap();
        let table = store.snapshot();
        assert!(table.resolve(2).is_custom());
        assert_eq!(table.resolve(2).curve().points, points());
        assert_eq!(table.resolve(1), Profile::BuiltIn(BuiltInProfile::Quiet));
    }

    #[test]
    fn test_snapshot_is_stable_across_edits() {
        let store = CurveStore::new(CurveTable::new(BuiltInProfile::Quiet));
        let before = store.snapshot();

        store.select_profile(BuiltInProfile::FullSpeed);
        store.set_custom(1, points()).unwrap();

        assert_eq!(before.profile(), BuiltInProfile::Quiet);
        assert!(before.custom(1).is_none());
        assert_eq!(store.snapshot().profile(), BuiltInProfile::FullSpeed);
    }

    #[test]
    fn test_rejects_invalid_custom_curve() {
        let store = CurveStore::default();
        let err = store
            .set_custom(1, vec![CurvePoint::new(50, 1000)])
            .unwrap_err();
        assert_eq!(err, CurveError::TooFewPoints(1));
        assert!(store.snapshot().custom(1).is_none());
    }

    #[test]
    fn test_clear_apply_and_reset() {
        let store = CurveStore::new(CurveTable::new(BuiltInProfile::Standard));
        store.set_custom(3, points()).unwrap();
        assert!(store.clear_custom(3));
        assert!(!store.clear_custom(3));

        store.set_custom(1, points()).unwrap();
        store.apply_to_all(1, &[1, 2, 3, 4]);
        let table = store.snapshot();
        for port in 1..=4 {
            assert_eq!(table.resolve(port).curve().points, points());
        }

        store.apply_to_all(5, &[2]);
        assert_eq!(
            store.snapshot().resolve(2).curve().points,
            BuiltInProfile::Standard.curve().points
        );

        store.reset();
        assert!((1..=4).all(|p| !store.snapshot().resolve(p).is_custom()));
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = Config::default();
        config.profile = BuiltInProfile::HighSpeed;
        config.ports[0].custom_curve = Some(points());
        config.ports.push(PortConfig {
            custom_curve: Some(vec![CurvePoint::new(40, 900)]),
            ..PortConfig::new(9)
        });

        let table = CurveTable::from_config(&config);
        assert_eq!(table.profile(), BuiltInProfile::HighSpeed);
        assert!(table.custom(1).is_some());
        // broken curves are kept so the controller can fall back at runtime
        assert!(table.custom(9).is_some());

        let mut saved = Config::default();
        table.write_to(&mut saved);
        assert_eq!(saved.profile, BuiltInProfile::HighSpeed);
        assert_eq!(saved.ports[0].custom_curve, Some(points()));
        assert_eq!(saved.ports[1].custom_curve, None);
    }
}
