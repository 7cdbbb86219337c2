use std::fs::{File, OpenOptions};
use std::io;
use std::num::NonZeroU32;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use drm::control::atomic::AtomicModeReq;
use drm::control::{property, AtomicCommitFlags, Device as ControlDevice};
use drm::{ClientCapability, Device as BasicDevice};
use tracing::{error, info, warn};

use super::{AtomicRequest, CommitFlags, Device, PlaneInfo, PropertyInfo};

#[derive(Debug)]
struct InternalDrmDeviceFd {
    file: File,
    privileged: bool,
}

impl AsFd for InternalDrmDeviceFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}
impl BasicDevice for InternalDrmDeviceFd {}
impl ControlDevice for InternalDrmDeviceFd {}

impl Drop for InternalDrmDeviceFd {
    fn drop(&mut self) {
        info!("Dropping drm device");
        if self.privileged {
            if let Err(err) = self.release_master_lock() {
                error!("Failed to drop drm master state. Error: {}", err);
            }
        }
    }
}

/// Ref-counted file descriptor of an open drm device.
///
/// Construction acquires the master lock (released again on drop of the last
/// clone) and enables the `Atomic` and `UniversalPlanes` client capabilities,
/// both of which the composition core relies on.
#[derive(Debug, Clone)]
pub struct DrmDeviceFd(Arc<InternalDrmDeviceFd>);

impl AsFd for DrmDeviceFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.file.as_fd()
    }
}

impl AsRawFd for DrmDeviceFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.file.as_raw_fd()
    }
}

impl BasicDevice for DrmDeviceFd {}
impl ControlDevice for DrmDeviceFd {}

impl DrmDeviceFd {
    /// Opens the drm node at `path`.
    pub fn open(path: impl AsRef<Path>) -> io::Result<DrmDeviceFd> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        DrmDeviceFd::new(file)
    }

    /// Wraps an already open drm node.
    ///
    /// Never create multiple `DrmDeviceFd`s out of the same node, clone the
    /// first one instead. A second instance would steal and release the
    /// master lock underneath the first.
    pub fn new(file: File) -> io::Result<DrmDeviceFd> {
        let mut dev = InternalDrmDeviceFd {
            file,
            privileged: false,
        };

        // We want to modeset, so we better be the master, if we run via a tty
        // session. This is only needed on older kernels. Newer kernels grant
        // this permission, if no other process is already the *master*.
        if dev.acquire_master_lock().is_err() {
            warn!("Unable to become drm master, assuming unprivileged mode");
        } else {
            dev.privileged = true;
        }

        dev.set_client_capability(ClientCapability::UniversalPlanes, true)?;
        dev.set_client_capability(ClientCapability::Atomic, true)?;

        Ok(DrmDeviceFd(Arc::new(dev)))
    }
}

impl Device for DrmDeviceFd {
    fn dev_path(&self) -> Option<PathBuf> {
        std::fs::read_link(format!("/proc/self/fd/{:?}", self.as_raw_fd())).ok()
    }

    fn plane_ids(&self) -> io::Result<Vec<u32>> {
        Ok(self.plane_handles()?.into_iter().map(Into::into).collect())
    }

    fn plane_info(&self, plane: u32) -> io::Result<PlaneInfo> {
        let handle = plane_handle(plane)?;
        let info = self.get_plane(handle)?;

        // The kernel reports compatible crtcs as one bit per index into the
        // resource list; recover the raw mask through the filter api.
        let res = self.resource_handles()?;
        let compatible = res.filter_crtcs(info.possible_crtcs());
        let mut mask = 0u32;
        for (idx, crtc) in res.crtcs().iter().enumerate() {
            if compatible.contains(crtc) {
                mask |= 1 << idx;
            }
        }

        Ok(PlaneInfo {
            possible_crtcs: mask,
            formats: info.formats().to_vec(),
        })
    }

    fn plane_properties(&self, plane: u32) -> io::Result<Vec<PropertyInfo>> {
        let handle = plane_handle(plane)?;
        let props = self.get_properties(handle)?;
        let (ids, values) = props.as_props_and_values();

        let mut out = Vec::with_capacity(ids.len());
        for (&id, &value) in ids.iter().zip(values.iter()) {
            let info = self.get_property(id)?;
            out.push(PropertyInfo {
                id: id.into(),
                name: info.name().to_string_lossy().into_owned(),
                value,
            });
        }
        Ok(out)
    }

    fn atomic_commit(&self, flags: CommitFlags, req: &AtomicRequest) -> io::Result<()> {
        let mut modereq = AtomicModeReq::new();
        for &(object, prop, value) in req.props() {
            let object = non_zero_id(object, "object id 0 in atomic request")?;
            let prop = non_zero_id(prop, "property id 0 in atomic request")?;
            modereq.add_raw_property(object, property::Handle::from(prop), value);
        }

        // drm-rs does not expose the atomic ioctl's user_data; completion
        // events are matched per-crtc by the event layer instead, so the
        // token in `req` is not forwarded here.
        ControlDevice::atomic_commit(self, AtomicCommitFlags::from_bits_retain(flags.bits()), modereq)
    }
}

fn plane_handle(id: u32) -> io::Result<drm::control::plane::Handle> {
    Ok(drm::control::plane::Handle::from(non_zero_id(id, "plane id 0")?))
}

fn non_zero_id(id: u32, msg: &'static str) -> io::Result<NonZeroU32> {
    NonZeroU32::new(id).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_send<S: Send>() {}

    #[test]
    fn device_fd_is_send() {
        is_send::<DrmDeviceFd>();
    }
}
