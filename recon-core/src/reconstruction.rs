use crate::{Camera, WorldPoint};
use derive_more::{From, Into};
use nalgebra::Vector4;
use std::collections::BTreeMap;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Identifies a [`View`] within a reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ViewId(pub u32);

/// Identifies a [`Track`] within a reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct TrackId(pub u32);

/// A camera observation instance which has been incorporated into a reconstruction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct View {
    /// The pose and intrinsics of the camera that produced this view.
    pub camera: Camera,
    /// Whether the camera pose has been computed. The pose carries no meaning
    /// until this is set.
    pub is_estimated: bool,
}

impl View {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            is_estimated: false,
        }
    }
}

/// A 3d point of reconstructed structure.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Track {
    /// The position of the track in homogeneous world coordinates.
    pub point: WorldPoint,
    /// Whether the position has been computed. The point carries no meaning
    /// until this is set.
    pub is_estimated: bool,
}

impl Track {
    pub fn new(point: WorldPoint) -> Self {
        Self {
            point,
            is_estimated: false,
        }
    }
}

impl Default for Track {
    fn default() -> Self {
        Self::new(WorldPoint(Vector4::zeros()))
    }
}

/// A set of views and tracks which exist in the same world space.
///
/// Views and tracks are keyed by identifiers which are never reused within one
/// reconstruction. Iteration order over either set is the identifier order, so
/// any operation driven by iteration is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Reconstruction {
    views: BTreeMap<ViewId, View>,
    tracks: BTreeMap<TrackId, Track>,
    next_view: u32,
    next_track: u32,
}

impl Reconstruction {
    /// Creates an empty reconstruction.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds an unestimated view with a freshly allocated identifier.
    pub fn add_view(&mut self, camera: Camera) -> ViewId {
        let id = ViewId(self.next_view);
        self.next_view += 1;
        self.views.insert(id, View::new(camera));
        id
    }

    /// Adds an unestimated view under a caller-chosen identifier, which allows
    /// two reconstructions to refer to the same observation by the same id.
    ///
    /// Returns `None` without modifying anything if the identifier is already
    /// present, since identifiers may never be reused.
    pub fn add_view_with_id(&mut self, id: ViewId, camera: Camera) -> Option<ViewId> {
        if self.views.contains_key(&id) {
            return None;
        }
        self.next_view = self.next_view.max(id.0 + 1);
        self.views.insert(id, View::new(camera));
        Some(id)
    }

    /// Adds an unestimated track with a freshly allocated identifier.
    pub fn add_track(&mut self, point: WorldPoint) -> TrackId {
        let id = TrackId(self.next_track);
        self.next_track += 1;
        self.tracks.insert(id, Track::new(point));
        id
    }

    /// Adds an unestimated track under a caller-chosen identifier.
    ///
    /// Returns `None` without modifying anything if the identifier is already
    /// present, since identifiers may never be reused.
    pub fn add_track_with_id(&mut self, id: TrackId, point: WorldPoint) -> Option<TrackId> {
        if self.tracks.contains_key(&id) {
            return None;
        }
        self.next_track = self.next_track.max(id.0 + 1);
        self.tracks.insert(id, Track::new(point));
        Some(id)
    }

    pub fn view(&self, id: ViewId) -> Option<&View> {
        self.views.get(&id)
    }

    pub fn view_mut(&mut self, id: ViewId) -> Option<&mut View> {
        self.views.get_mut(&id)
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub fn view_ids(&self) -> impl Iterator<Item = ViewId> + '_ {
        self.views.keys().copied()
    }

    pub fn track_ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks.keys().copied()
    }

    pub fn views(&self) -> impl Iterator<Item = (ViewId, &View)> + '_ {
        self.views.iter().map(|(&id, view)| (id, view))
    }

    pub fn views_mut(&mut self) -> impl Iterator<Item = (ViewId, &mut View)> + '_ {
        self.views.iter_mut().map(|(&id, view)| (id, view))
    }

    pub fn tracks(&self) -> impl Iterator<Item = (TrackId, &Track)> + '_ {
        self.tracks.iter().map(|(&id, track)| (id, track))
    }

    pub fn tracks_mut(&mut self) -> impl Iterator<Item = (TrackId, &mut Track)> + '_ {
        self.tracks.iter_mut().map(|(&id, track)| (id, track))
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty() && self.tracks.is_empty()
    }
}
