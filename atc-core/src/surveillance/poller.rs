//! Surveillance poller: periodically refreshes the contacts snapshot from
//! a [`SurveillanceProvider`] and publishes updates.
//!
//! Grounded in `original_source/tracking/adsb_tracker.py`'s `ADSBTracker`
//! (`update_aircraft_positions` / `current_aircraft` dict /
//! `find_aircraft_by_callsign` / `get_aircraft_at_altitude` /
//! `get_aircraft_by_position`) and in `dictum_core::engine::DictumEngine`'s
//! lifecycle shape (spawn a long-running task, hand it a child
//! `CancellationToken`, stop cleanly on cancel).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::provider::SurveillanceProvider;
use crate::models::Contact;

/// Single-writer/many-reader snapshot of the current contact set, keyed by
/// `icao24`. Readers see either the old full set or the new full set, never
/// a partial mix (§5, ordering guarantees) — a full `Arc<HashMap<_>>` is
/// swapped under a short-lived mutex hold, so readers clone the `Arc`
/// (cheap) rather than holding the lock while iterating.
pub struct ContactSet {
    inner: Mutex<Arc<HashMap<String, Contact>>>,
}

impl Default for ContactSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactSet {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Arc::new(HashMap::new())),
        }
    }

    fn replace(&self, contacts: Vec<Contact>) {
        let map: HashMap<String, Contact> = contacts
            .into_iter()
            .map(|c| (c.icao24.clone(), c))
            .collect();
        *self.inner.lock() = Arc::new(map);
    }

    /// A read-only snapshot of the current contacts, taken atomically.
    pub fn snapshot(&self) -> Arc<HashMap<String, Contact>> {
        Arc::clone(&self.inner.lock())
    }

    /// Find a contact by callsign. A read-only scan over the snapshot's
    /// values — never a second authoritative map (§3.1).
    pub fn find_by_callsign(&self, callsign: &str) -> Option<Contact> {
        let needle = callsign.trim().to_uppercase();
        self.snapshot()
            .values()
            .find(|c| c.callsign.as_deref().map(|cs| cs.trim().to_uppercase()) == Some(needle.clone()))
            .cloned()
    }

    /// Contacts within `altitude_ft ± tolerance`.
    pub fn at_altitude(&self, altitude_ft: i32, tolerance_ft: i32) -> Vec<Contact> {
        self.snapshot()
            .values()
            .filter(|c| (c.altitude_ft - altitude_ft).abs() <= tolerance_ft)
            .cloned()
            .collect()
    }

    /// Contacts within `bearing_deg ± bearing_tolerance` and
    /// `distance_nm ± distance_tolerance` of the reference point.
    pub fn by_position(
        &self,
        bearing_deg: f64,
        distance_nm: f64,
        bearing_tolerance: f64,
        distance_tolerance: f64,
    ) -> Vec<Contact> {
        self.snapshot()
            .values()
            .filter(|c| {
                (c.bearing_deg - bearing_deg).abs() <= bearing_tolerance
                    && (c.distance_nm - distance_nm).abs() <= distance_tolerance
            })
            .cloned()
            .collect()
    }
}

/// Drives the poll → parse → replace-snapshot → publish loop.
pub struct SurveillancePoller {
    provider: Arc<dyn SurveillanceProvider>,
    contacts: Arc<ContactSet>,
    airport_lat: f64,
    airport_lon: f64,
    search_radius_nm: f64,
    rate_limit: Duration,
}

impl SurveillancePoller {
    pub fn new(
        provider: Arc<dyn SurveillanceProvider>,
        contacts: Arc<ContactSet>,
        airport_lat: f64,
        airport_lon: f64,
        search_radius_nm: f64,
        rate_limit: Duration,
    ) -> Self {
        Self {
            provider,
            contacts,
            airport_lat,
            airport_lon,
            search_radius_nm,
            rate_limit,
        }
    }

    /// Run the poll loop until `token` is cancelled, invoking
    /// `on_update` once per contact after every successful refresh.
    pub async fn run<F>(self, token: CancellationToken, mut on_update: F)
    where
        F: FnMut(&Contact) + Send,
    {
        let mut last_request: Option<Instant> = None;

        loop {
            if token.is_cancelled() {
                break;
            }

            if let Some(last) = last_request {
                let elapsed = last.elapsed();
                if elapsed < self.rate_limit {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.rate_limit - elapsed) => {}
                    }
                }
            }

            last_request = Some(Instant::now());

            match self
                .provider
                .contacts_in_area(self.airport_lat, self.airport_lon, self.search_radius_nm)
                .await
            {
                Ok(contacts) => {
                    info!(count = contacts.len(), "surveillance poll succeeded");
                    self.contacts.replace(contacts);
                    for contact in self.contacts.snapshot().values() {
                        on_update(contact);
                    }
                }
                Err(e) => {
                    error!(error = %e, "surveillance poll failed, retaining previous contact set");
                }
            }
        }

        info!("surveillance poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn contact(icao24: &str, callsign: Option<&str>, altitude_ft: i32) -> Contact {
        Contact {
            icao24: icao24.to_string(),
            callsign: callsign.map(|s| s.to_string()),
            altitude_ft,
            track_deg: 0,
            ground_speed_kt: 0,
            vertical_rate_fpm: 0,
            latitude: 45.5,
            longitude: -122.6,
            on_ground: false,
            squawk: None,
            timestamp: Utc::now(),
            distance_nm: 10.0,
            bearing_deg: 90.0,
        }
    }

    #[test]
    fn snapshot_replace_is_keyed_by_icao24() {
        let set = ContactSet::new();
        set.replace(vec![contact("A1B2C3", Some("DAL2617"), 5000)]);
        assert_eq!(set.snapshot().len(), 1);
        set.replace(vec![contact("A1B2C3", Some("DAL2617"), 6000)]);
        let snap = set.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap["A1B2C3"].altitude_ft, 6000);
    }

    #[test]
    fn vanished_contacts_disappear_from_the_set() {
        let set = ContactSet::new();
        set.replace(vec![
            contact("A1B2C3", Some("DAL2617"), 5000),
            contact("D4E5F6", Some("UAL123"), 8000),
        ]);
        set.replace(vec![contact("A1B2C3", Some("DAL2617"), 5000)]);
        assert_eq!(set.snapshot().len(), 1);
        assert!(!set.snapshot().contains_key("D4E5F6"));
    }

    #[test]
    fn find_by_callsign_is_case_insensitive() {
        let set = ContactSet::new();
        set.replace(vec![contact("A1B2C3", Some("dal2617"), 5000)]);
        assert!(set.find_by_callsign("DAL2617").is_some());
    }

    #[test]
    fn at_altitude_honors_tolerance() {
        let set = ContactSet::new();
        set.replace(vec![contact("A1B2C3", None, 5000)]);
        assert_eq!(set.at_altitude(5400, 500).len(), 1);
        assert_eq!(set.at_altitude(6000, 500).len(), 0);
    }
}
