//! In-memory [`Device`] used by the unit tests.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::Fourcc;

use super::{AtomicRequest, CommitFlags, Device, PlaneInfo, PropertyInfo};

/// Description of one fake plane.
#[derive(Debug, Clone)]
pub(crate) struct MockPlane {
    pub id: u32,
    pub possible_crtcs: u32,
    pub formats: Vec<Fourcc>,
    pub properties: Vec<PropertyInfo>,
}

impl MockPlane {
    /// A plane with the standard atomic property set.
    ///
    /// Property ids are derived from the plane id so every plane gets a
    /// distinct, recognizable id space.
    pub fn new(id: u32, kind: u64, possible_crtcs: u32, formats: &[Fourcc]) -> Self {
        let base = id * 100;
        let mut properties = vec![PropertyInfo {
            id: base + 1,
            name: "type".into(),
            value: kind,
        }];
        for (n, name) in [
            "CRTC_ID", "FB_ID", "CRTC_X", "CRTC_Y", "CRTC_W", "CRTC_H", "SRC_X", "SRC_Y",
            "SRC_W", "SRC_H",
        ]
        .into_iter()
        .enumerate()
        {
            properties.push(PropertyInfo {
                id: base + 2 + n as u32,
                name: name.into(),
                value: 0,
            });
        }
        MockPlane {
            id,
            possible_crtcs,
            formats: formats.to_vec(),
            properties,
        }
    }

    pub fn with_property(mut self, name: &str) -> Self {
        let id = self.id * 100 + 20 + self.properties.len() as u32;
        self.properties.push(PropertyInfo {
            id,
            name: name.into(),
            value: 0,
        });
        self
    }

    pub fn without_property(mut self, name: &str) -> Self {
        self.properties.retain(|p| p.name != name);
        self
    }

    pub fn property_id(&self, name: &str) -> u32 {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.id)
            .unwrap_or_else(|| panic!("no property {name}"))
    }
}

/// Records every submitted atomic request instead of talking to a kernel.
#[derive(Debug, Default)]
pub(crate) struct MockDevice {
    pub planes: Vec<MockPlane>,
    pub commits: Mutex<Vec<(CommitFlags, AtomicRequest)>>,
    /// When set, every commit (test or real) fails like a kernel rejection.
    pub reject_commits: AtomicBool,
}

impl MockDevice {
    pub fn new(planes: Vec<MockPlane>) -> Self {
        MockDevice {
            planes,
            ..Default::default()
        }
    }

    pub fn commit_count(&self) -> usize {
        self.commits.lock().unwrap().len()
    }

    pub fn last_commit(&self) -> (CommitFlags, AtomicRequest) {
        self.commits.lock().unwrap().last().cloned().expect("no commit recorded")
    }

    fn plane(&self, id: u32) -> io::Result<&MockPlane> {
        self.planes
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such plane"))
    }
}

impl Device for &MockDevice {
    fn dev_path(&self) -> Option<PathBuf> {
        Some(PathBuf::from("/dev/dri/mock"))
    }

    fn plane_ids(&self) -> io::Result<Vec<u32>> {
        Ok(self.planes.iter().map(|p| p.id).collect())
    }

    fn plane_info(&self, plane: u32) -> io::Result<PlaneInfo> {
        let plane = self.plane(plane)?;
        Ok(PlaneInfo {
            possible_crtcs: plane.possible_crtcs,
            formats: plane.formats.iter().map(|&f| f as u32).collect(),
        })
    }

    fn plane_properties(&self, plane: u32) -> io::Result<Vec<PropertyInfo>> {
        Ok(self.plane(plane)?.properties.clone())
    }

    fn atomic_commit(&self, flags: CommitFlags, req: &AtomicRequest) -> io::Result<()> {
        if self.reject_commits.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "rejected"));
        }
        self.commits.lock().unwrap().push((flags, req.clone()));
        Ok(())
    }
}
