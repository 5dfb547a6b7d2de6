//! Generation and load shift keys (GLSK).
//!
//! A GLSK gives, for every zone, the share of a zonal exchange carried by
//! each injection. Weights of a zone sum to 1.
//!
//! Two providers are available:
//! - [`AutoGlskProvider`]: weights proportional to generator target output,
//!   uniform when a zone's total target output is zero
//! - [`DocumentBasedGlskProvider`]: the automatic GLSK, with every zone present
//!   in an external [`GlskDocument`] replaced by the document's weights
//!
//! Any `Fn(&Network) -> FlowDecompositionResult<ZonalGlsks>` is a provider too,
//! which covers hand-written shift keys.

use chrono::{DateTime, Utc};
use flowdec_core::{
    FlowDecompositionError, FlowDecompositionResult, InjectionId, InjectionKind, Network, ZoneId,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Zone → (injection → weight).
pub type ZonalGlsks = BTreeMap<ZoneId, BTreeMap<InjectionId, f64>>;

/// Source of per-zone shift keys.
pub trait GlskProvider {
    fn glsk(&self, network: &Network) -> FlowDecompositionResult<ZonalGlsks>;
}

impl<F> GlskProvider for F
where
    F: Fn(&Network) -> FlowDecompositionResult<ZonalGlsks>,
{
    fn glsk(&self, network: &Network) -> FlowDecompositionResult<ZonalGlsks> {
        self(network)
    }
}

/// Shift keys from generator target output.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoGlskProvider;

impl GlskProvider for AutoGlskProvider {
    fn glsk(&self, network: &Network) -> FlowDecompositionResult<ZonalGlsks> {
        let mut glsks: ZonalGlsks = network
            .zones()
            .into_iter()
            .map(|zone| (zone, BTreeMap::new()))
            .collect();

        for injection in network.injections() {
            let InjectionKind::Generator { target_p } = injection.kind else {
                continue;
            };
            if !injection.terminal.connected {
                continue;
            }
            let zone = network.terminal_zone(&injection.terminal)?;
            glsks
                .entry(zone.clone())
                .or_default()
                .insert(injection.id.clone(), target_p);
        }

        for weights in glsks.values_mut() {
            normalize(weights);
        }
        Ok(glsks)
    }
}

/// Scales weights to sum 1; a zero sum gives every participant `1/N`.
pub(crate) fn normalize(weights: &mut BTreeMap<InjectionId, f64>) {
    let sum: f64 = weights.values().sum();
    let count = weights.len() as f64;
    for weight in weights.values_mut() {
        *weight = if sum == 0.0 { 1.0 / count } else { *weight / sum };
    }
}

/// External zonal shift key document.
pub trait GlskDocument {
    /// Shift keys per zone; `instant` selects a time-dependent point when given.
    fn zonal_glsks(
        &self,
        network: &Network,
        instant: Option<DateTime<Utc>>,
    ) -> FlowDecompositionResult<ZonalGlsks>;
}

/// Shift keys of one zone valid over `[start, end)`.
#[derive(Debug, Clone)]
pub struct GlskPoint {
    pub validity: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub weights: BTreeMap<InjectionId, f64>,
}

impl GlskPoint {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        match self.validity {
            Some((start, end)) => start <= instant && instant < end,
            None => true,
        }
    }
}

/// GLSK document held in memory.
///
/// Without an instant the first point of each zone is used. Weights naming
/// injections absent from the network are dropped, and the remaining weights
/// are normalized.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGlskDocument {
    points: BTreeMap<ZoneId, Vec<GlskPoint>>,
}

impl InMemoryGlskDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_point(
        mut self,
        zone: impl Into<String>,
        validity: Option<(DateTime<Utc>, DateTime<Utc>)>,
        weights: &[(&str, f64)],
    ) -> Self {
        let weights = weights
            .iter()
            .map(|(id, weight)| (InjectionId::new(*id), *weight))
            .collect();
        self.points
            .entry(ZoneId::new(zone))
            .or_default()
            .push(GlskPoint { validity, weights });
        self
    }

    pub fn zones(&self) -> impl Iterator<Item = &ZoneId> {
        self.points.keys()
    }
}

impl GlskDocument for InMemoryGlskDocument {
    fn zonal_glsks(
        &self,
        network: &Network,
        instant: Option<DateTime<Utc>>,
    ) -> FlowDecompositionResult<ZonalGlsks> {
        let mut glsks = ZonalGlsks::new();
        for (zone, points) in &self.points {
            let point = match instant {
                Some(instant) => points.iter().find(|p| p.contains(instant)),
                None => points.first(),
            }
            .ok_or_else(|| {
                FlowDecompositionError::UnknownElement(format!(
                    "GLSK point for zone {zone} at {instant:?}"
                ))
            })?;

            let mut weights = BTreeMap::new();
            for (id, weight) in &point.weights {
                if network.injection(id).is_some() {
                    weights.insert(id.clone(), *weight);
                } else {
                    warn!(zone = %zone, injection = %id, "GLSK injection not found in network, ignored");
                }
            }
            normalize(&mut weights);
            glsks.insert(zone.clone(), weights);
        }
        Ok(glsks)
    }
}

/// Instant used to read a time-dependent document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlskInstant {
    NotTimeSpecific,
    /// The network case date (not time specific when the network has none)
    NetworkInstant,
    Given(DateTime<Utc>),
}

/// Automatic shift keys overlaid zone by zone with a document.
pub struct DocumentBasedGlskProvider<D> {
    document: D,
    instant: GlskInstant,
}

impl<D: GlskDocument> DocumentBasedGlskProvider<D> {
    pub fn not_time_specific(document: D) -> Self {
        Self {
            document,
            instant: GlskInstant::NotTimeSpecific,
        }
    }

    pub fn based_on_network_instant(document: D) -> Self {
        Self {
            document,
            instant: GlskInstant::NetworkInstant,
        }
    }

    pub fn based_on_given_instant(document: D, instant: DateTime<Utc>) -> Self {
        Self {
            document,
            instant: GlskInstant::Given(instant),
        }
    }

    fn resolve_instant(&self, network: &Network) -> Option<DateTime<Utc>> {
        match self.instant {
            GlskInstant::NotTimeSpecific => None,
            GlskInstant::NetworkInstant => {
                if network.case_date.is_none() {
                    warn!(network = %network.id, "network has no case date, reading GLSK document without instant");
                }
                network.case_date
            }
            GlskInstant::Given(instant) => Some(instant),
        }
    }
}

impl<D: GlskDocument> GlskProvider for DocumentBasedGlskProvider<D> {
    fn glsk(&self, network: &Network) -> FlowDecompositionResult<ZonalGlsks> {
        let mut glsks = AutoGlskProvider.glsk(network)?;
        let instant = self.resolve_instant(network);
        for (zone, weights) in self.document.zonal_glsks(network, instant)? {
            debug!(zone = %zone, injections = weights.len(), "GLSK zone taken from document");
            glsks.insert(zone, weights);
        }
        Ok(glsks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flowdec_core::{Bus, Injection, Terminal, VoltageLevel};

    fn network() -> Network {
        let mut network = Network::new("glsk");
        for (vl, zone) in [("VL_FR", "FR"), ("VL_BE", "BE"), ("VL_NL", "NL")] {
            network
                .add_voltage_level(VoltageLevel::bus_breaker(vl, zone))
                .unwrap();
        }
        network.add_bus(Bus::new("FR", "VL_FR")).unwrap();
        network.add_bus(Bus::new("BE", "VL_BE")).unwrap();
        network.add_bus(Bus::new("NL", "VL_NL")).unwrap();
        for (id, bus, p) in [
            ("G_FR1", "FR", 300.0),
            ("G_FR2", "FR", 100.0),
            ("G_BE1", "BE", 0.0),
            ("G_BE2", "BE", 0.0),
        ] {
            network
                .add_injection(Injection::generator(id, p, Terminal::new(bus)))
                .unwrap();
        }
        network
            .add_injection(Injection::generator(
                "G_FR_OFF",
                50.0,
                Terminal::new("FR").disconnected(),
            ))
            .unwrap();
        network
            .add_injection(Injection::load("L_BE", 80.0, Terminal::new("BE")))
            .unwrap();
        network
    }

    fn weight(glsks: &ZonalGlsks, zone: &str, id: &str) -> Option<f64> {
        glsks
            .get(&ZoneId::new(zone))
            .and_then(|w| w.get(&InjectionId::new(id)))
            .copied()
    }

    #[test]
    fn test_auto_glsk_is_proportional_to_target_p() {
        let glsks = AutoGlskProvider.glsk(&network()).unwrap();
        assert!((weight(&glsks, "FR", "G_FR1").unwrap() - 0.75).abs() < 1e-9);
        assert!((weight(&glsks, "FR", "G_FR2").unwrap() - 0.25).abs() < 1e-9);
        assert!(weight(&glsks, "FR", "G_FR_OFF").is_none());
        assert!(weight(&glsks, "BE", "L_BE").is_none());
    }

    #[test]
    fn test_auto_glsk_zero_generation_is_uniform() {
        let glsks = AutoGlskProvider.glsk(&network()).unwrap();
        assert!((weight(&glsks, "BE", "G_BE1").unwrap() - 0.5).abs() < 1e-9);
        assert!((weight(&glsks, "BE", "G_BE2").unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_zone_without_generator_is_present_and_empty() {
        let glsks = AutoGlskProvider.glsk(&network()).unwrap();
        assert!(glsks[&ZoneId::new("NL")].is_empty());
    }

    #[test]
    fn test_every_zone_sums_to_one() {
        let glsks = AutoGlskProvider.glsk(&network()).unwrap();
        for weights in glsks.values().filter(|w| !w.is_empty()) {
            let sum: f64 = weights.values().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_document_replaces_zone_and_keeps_others() {
        let document = InMemoryGlskDocument::new().with_point("FR", None, &[("G_FR2", 2.0)]);
        let provider = DocumentBasedGlskProvider::not_time_specific(document);
        let glsks = provider.glsk(&network()).unwrap();
        assert!((weight(&glsks, "FR", "G_FR2").unwrap() - 1.0).abs() < 1e-9);
        assert!(weight(&glsks, "FR", "G_FR1").is_none());
        assert!((weight(&glsks, "BE", "G_BE1").unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_document_instants() {
        let t0 = Utc.with_ymd_and_hms(2014, 1, 16, 20, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2014, 1, 16, 21, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2014, 1, 16, 22, 0, 0).unwrap();
        let document = InMemoryGlskDocument::new()
            .with_point("FR", Some((t0, t1)), &[("G_FR1", 1.0)])
            .with_point("FR", Some((t1, t2)), &[("G_FR2", 1.0)]);

        let network = network().with_case_date(t0);
        let by_network = DocumentBasedGlskProvider::based_on_network_instant(document.clone());
        let glsks = by_network.glsk(&network).unwrap();
        assert!((weight(&glsks, "FR", "G_FR1").unwrap() - 1.0).abs() < 1e-9);

        let given = DocumentBasedGlskProvider::based_on_given_instant(document.clone(), t1);
        let glsks = given.glsk(&network).unwrap();
        assert!((weight(&glsks, "FR", "G_FR2").unwrap() - 1.0).abs() < 1e-9);

        let outside = DocumentBasedGlskProvider::based_on_given_instant(document, t2);
        assert!(outside.glsk(&network).is_err());
    }

    #[test]
    fn test_closure_provider() {
        let provider = |_: &Network| -> FlowDecompositionResult<ZonalGlsks> {
            let mut glsks = ZonalGlsks::new();
            glsks.insert(
                ZoneId::new("FR"),
                BTreeMap::from([(InjectionId::new("G_FR2"), 1.0)]),
            );
            Ok(glsks)
        };
        let glsks = provider.glsk(&network()).unwrap();
        assert_eq!(glsks.len(), 1);
    }
}
