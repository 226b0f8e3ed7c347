//! Host-supplied configuration assembled once per [`crate::Machine`].

use crate::fd::{IoctlFilter, OpenFilter, StatFilter, WritePermit};
use std::io::Read;

/// Something the guest's vfd-0 reads draw from. Boxed so callers can plug in
/// a real stdin, a fixture buffer, or anything else implementing `Read`.
pub type StdinReader = Box<dyn Read + Send>;

/// Builder-style configuration for a [`crate::Machine`]. Every field has a
/// permissive default; callers override what they need.
pub struct MachineConfig {
    pub pages_total: u64,
    pub brk_max: u64,
    pub protect_segments: bool,
    pub permit_filesystem: bool,
    filter_open: Option<OpenFilter>,
    filter_ioctl: Option<IoctlFilter>,
    filter_stat: Option<StatFilter>,
    permit_write: Option<WritePermit>,
    stdin: Option<StdinReader>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            pages_total: 1 << 20,
            brk_max: 64 << 20,
            protect_segments: true,
            permit_filesystem: false,
            filter_open: None,
            filter_ioctl: None,
            filter_stat: None,
            permit_write: None,
            stdin: None,
        }
    }
}

impl MachineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pages_total(mut self, pages: u64) -> Self {
        self.pages_total = pages;
        self
    }

    pub fn brk_max(mut self, bytes: u64) -> Self {
        self.brk_max = bytes;
        self
    }

    pub fn protect_segments(mut self, enabled: bool) -> Self {
        self.protect_segments = enabled;
        self
    }

    pub fn permit_filesystem(mut self, enabled: bool) -> Self {
        self.permit_filesystem = enabled;
        self
    }

    pub fn filter_open(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.filter_open = Some(Box::new(f));
        self
    }

    pub fn filter_ioctl(mut self, f: impl Fn(u64) -> bool + Send + Sync + 'static) -> Self {
        self.filter_ioctl = Some(Box::new(f));
        self
    }

    pub fn filter_stat(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.filter_stat = Some(Box::new(f));
        self
    }

    pub fn permit_write(mut self, f: impl Fn(i32) -> bool + Send + Sync + 'static) -> Self {
        self.permit_write = Some(Box::new(f));
        self
    }

    pub fn stdin(mut self, reader: impl Read + Send + 'static) -> Self {
        self.stdin = Some(Box::new(reader));
        self
    }

    pub(crate) fn into_parts(
        self,
    ) -> (u64, u64, bool, bool, Option<OpenFilter>, Option<IoctlFilter>, Option<StatFilter>, Option<WritePermit>, Option<StdinReader>)
    {
        (
            self.pages_total,
            self.brk_max,
            self.protect_segments,
            self.permit_filesystem,
            self.filter_open,
            self.filter_ioctl,
            self.filter_stat,
            self.permit_write,
            self.stdin,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive_but_bounded() {
        let cfg = MachineConfig::new();
        assert!(cfg.pages_total > 0);
        assert!(cfg.brk_max > 0);
        assert!(!cfg.permit_filesystem);
    }

    #[test]
    fn builder_methods_chain_and_override_defaults() {
        let cfg = MachineConfig::new().pages_total(16).brk_max(4096).permit_filesystem(true);
        assert_eq!(cfg.pages_total, 16);
        assert_eq!(cfg.brk_max, 4096);
        assert!(cfg.permit_filesystem);
    }
}
