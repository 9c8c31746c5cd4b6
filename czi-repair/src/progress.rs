/// Trait for receiving progress updates while scanning and patching.
///
/// Every method has an empty default, so implementors only override what
/// they display. Progress has no effect on the results.
pub trait RepairProgress {
    /// Called before the directory is scanned.
    fn scan_start(&self, _total: usize) {}

    /// Called after each directory entry has been examined.
    fn tile_examined(&self, _current: usize, _total: usize) {}

    /// Called when the scan is complete.
    fn scan_completed(&self, _repairs: usize) {}

    /// Called after the directory copy of the sizes has been patched.
    fn directory_patched(&self, _fields: usize) {}

    /// Called after the embedded copy of a tile has been patched.
    fn subblock_patched(&self, _tile_index: usize, _fields: usize) {}
}

impl<P: RepairProgress + ?Sized> RepairProgress for &P {
    fn scan_start(&self, total: usize) {
        (**self).scan_start(total);
    }

    fn tile_examined(&self, current: usize, total: usize) {
        (**self).tile_examined(current, total);
    }

    fn scan_completed(&self, repairs: usize) {
        (**self).scan_completed(repairs);
    }

    fn directory_patched(&self, fields: usize) {
        (**self).directory_patched(fields);
    }

    fn subblock_patched(&self, tile_index: usize, fields: usize) {
        (**self).subblock_patched(tile_index, fields);
    }
}

/// A no-op progress implementation that discards all updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl RepairProgress for SilentProgress {}

/// Console progress reporter drawing an indicatif bar on stderr while the
/// tiles are scanned.
#[cfg(feature = "cli")]
pub struct ConsoleProgress {
    bar: indicatif::ProgressBar,
}

#[cfg(feature = "cli")]
impl ConsoleProgress {
    pub fn new() -> Self {
        Self {
            bar: indicatif::ProgressBar::hidden(),
        }
    }
}

#[cfg(feature = "cli")]
impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "cli")]
impl RepairProgress for ConsoleProgress {
    fn scan_start(&self, total: usize) {
        self.bar
            .set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("{bar:40.cyan/blue} {pos}/{len} sub-blocks [{elapsed_precise}]")
                .unwrap()
                .progress_chars("━╸─"),
        );
        self.bar.reset();
    }

    fn tile_examined(&self, current: usize, _total: usize) {
        self.bar.set_position(current as u64 + 1);
    }

    fn scan_completed(&self, _repairs: usize) {
        self.bar.finish_and_clear();
    }
}
