//! Spatial operations: coordinates, haversine distances, and the H3-backed
//! driver position index.
//!
//! Exact distances (matching, geofence) use the haversine great-circle
//! formula on raw coordinates. The [DriverIndex] maps H3 cells to driver
//! entities so the matcher can prefilter candidates with a grid-disk query
//! instead of scanning every driver; disk expansions are LRU-cached.
//!
//! Default resolution is 9 (~240m cell size), suitable for city-scale
//! dispatch areas.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use bevy_ecs::prelude::{Entity, Resource};
use h3o::{CellIndex, LatLng, Resolution};
use lru::LruCache;
use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Approximate hexagon edge length at resolution 9, in meters. Used to
/// convert a metric search radius into a grid-disk `k`.
const AVG_HEX_EDGE_M_RES9: f64 = 174.4;

/// A WGS84 coordinate as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// The H3 cell containing this coordinate, or `None` for out-of-range
    /// latitudes/longitudes.
    pub fn to_cell(&self, resolution: Resolution) -> Option<CellIndex> {
        LatLng::new(self.lat, self.lng)
            .ok()
            .map(|ll| ll.to_cell(resolution))
    }
}

/// Haversine great-circle distance between two coordinates, in meters.
pub fn haversine_distance_m(a: &Coordinate, b: &Coordinate) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

#[derive(Debug, Clone, Copy)]
pub struct GeoIndex {
    resolution: Resolution,
}

impl GeoIndex {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn cell_for(&self, coordinate: &Coordinate) -> Option<CellIndex> {
        coordinate.to_cell(self.resolution)
    }

    /// Grid-disk `k` that covers a metric radius around a cell center.
    /// Padded by one ring so edge candidates are not cut off.
    pub fn grid_k_for_radius(&self, radius_m: f64) -> u32 {
        if radius_m <= 0.0 {
            return 0;
        }
        (radius_m / (2.0 * AVG_HEX_EDGE_M_RES9)).ceil() as u32 + 1
    }
}

impl Default for GeoIndex {
    fn default() -> Self {
        Self {
            resolution: Resolution::Nine,
        }
    }
}

/// Index of driver entities by H3 cell, kept in sync by the location stream.
///
/// Maintains the forward cell → entities mapping plus the reverse entity →
/// cell mapping for O(1) moves, mirroring how positions feed future matching.
#[derive(Debug, Resource)]
pub struct DriverIndex {
    geo: GeoIndex,
    drivers_by_cell: HashMap<CellIndex, Vec<Entity>>,
    driver_to_cell: HashMap<Entity, CellIndex>,
    disk_cache: LruCache<(CellIndex, u32), Vec<CellIndex>>,
}

impl DriverIndex {
    pub fn new(geo: GeoIndex) -> Self {
        Self {
            geo,
            drivers_by_cell: HashMap::new(),
            driver_to_cell: HashMap::new(),
            disk_cache: LruCache::new(
                NonZeroUsize::new(1_000).unwrap_or(NonZeroUsize::MIN),
            ),
        }
    }

    pub fn geo(&self) -> &GeoIndex {
        &self.geo
    }

    pub fn cell_for(&self, coordinate: &Coordinate) -> Option<CellIndex> {
        self.geo.cell_for(coordinate)
    }

    /// Place or move a driver. Returns `true` when the driver changed cell
    /// (including first insertion).
    pub fn upsert(&mut self, entity: Entity, cell: CellIndex) -> bool {
        match self.driver_to_cell.get(&entity).copied() {
            Some(old) if old == cell => false,
            Some(old) => {
                self.detach(entity, old);
                self.attach(entity, cell);
                true
            }
            None => {
                self.attach(entity, cell);
                true
            }
        }
    }

    pub fn remove(&mut self, entity: Entity) {
        if let Some(cell) = self.driver_to_cell.remove(&entity) {
            if let Some(entities) = self.drivers_by_cell.get_mut(&cell) {
                entities.retain(|&e| e != entity);
                if entities.is_empty() {
                    self.drivers_by_cell.remove(&cell);
                }
            }
        }
    }

    pub fn cell_of(&self, entity: Entity) -> Option<CellIndex> {
        self.driver_to_cell.get(&entity).copied()
    }

    /// Driver entities whose cell falls within the grid disk covering
    /// `radius_m` around `origin`. Callers still apply the exact haversine
    /// cutoff; this is a coarse prefilter.
    pub fn drivers_near(&mut self, origin: CellIndex, radius_m: f64) -> Vec<Entity> {
        let k = self.geo.grid_k_for_radius(radius_m);
        let cells = self
            .disk_cache
            .get_or_insert((origin, k), || origin.grid_disk::<Vec<_>>(k))
            .clone();
        let mut result = Vec::new();
        for cell in &cells {
            if let Some(entities) = self.drivers_by_cell.get(cell) {
                result.extend(entities.iter().copied());
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.driver_to_cell.len()
    }

    pub fn is_empty(&self) -> bool {
        self.driver_to_cell.is_empty()
    }

    fn attach(&mut self, entity: Entity, cell: CellIndex) {
        self.drivers_by_cell.entry(cell).or_default().push(entity);
        self.driver_to_cell.insert(entity, cell);
    }

    fn detach(&mut self, entity: Entity, cell: CellIndex) {
        if let Some(entities) = self.drivers_by_cell.get_mut(&cell) {
            entities.retain(|&e| e != entity);
            if entities.is_empty() {
                self.drivers_by_cell.remove(&cell);
            }
        }
    }
}

impl Default for DriverIndex {
    fn default() -> Self {
        Self::new(GeoIndex::default())
    }
}
