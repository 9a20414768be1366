//! Vowpal Wabbit adapter over the `vw_c_wrapper` C API
//!
//! Each model file becomes one VW instance started in test-only mode. The C
//! API is not safe to call concurrently on one instance, so every call goes
//! through the handle's mutex.

use super::{Engine, EngineHandle};
use parking_lot::Mutex;
use scored_common::{Result, ScoredError};
use std::ffi::{c_char, c_float, c_void, CString};
use std::path::Path;

type RawHandle = *mut c_void;
type RawExample = *mut c_void;

extern "C" {
    fn VW_InitializeA(args: *const c_char) -> RawHandle;
    fn VW_Finish(handle: RawHandle);
    fn VW_ReadExampleA(handle: RawHandle, line: *const c_char) -> RawExample;
    fn VW_Predict(handle: RawHandle, example: RawExample) -> c_float;
    fn VW_FinishExample(handle: RawHandle, example: RawExample);
}

/// Engine adapter that starts one VW instance per model file
#[derive(Debug, Clone)]
pub struct VwEngine {
    args: String,
}

impl VwEngine {
    pub fn new() -> Self {
        Self {
            args: "--quiet -t".to_string(),
        }
    }
}

impl Default for VwEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for VwEngine {
    fn load(&self, path: &Path) -> Result<Box<dyn EngineHandle>> {
        // VW aborts the process on a missing model instead of failing
        if !path.is_file() {
            return Err(ScoredError::engine_load(path, "not a regular file"));
        }

        let cmdline = CString::new(format!("{} -i {}", self.args, path.display()))
            .map_err(|e| ScoredError::engine_load(path, e))?;

        // SAFETY: `cmdline` is a valid C string and outlives the instance.
        let raw = unsafe { VW_InitializeA(cmdline.as_ptr()) };
        if raw.is_null() {
            return Err(ScoredError::engine_load(path, "VW_InitializeA returned no instance"));
        }

        Ok(Box::new(VwModel {
            instance: Mutex::new(Instance(raw)),
            _cmdline: cmdline,
        }))
    }
}

struct Instance(RawHandle);

// SAFETY: the pointer is only dereferenced by VW while the owning mutex is held.
unsafe impl Send for Instance {}

/// A live VW instance
pub struct VwModel {
    instance: Mutex<Instance>,
    _cmdline: CString,
}

impl EngineHandle for VwModel {
    fn predict(&self, example: &str) -> Result<f64> {
        let line = CString::new(example)
            .map_err(|_| ScoredError::engine("example contains a NUL byte"))?;

        let instance = self.instance.lock();

        // SAFETY: the instance is live until drop and access is serialized by the lock.
        let pred = unsafe {
            let ex = VW_ReadExampleA(instance.0, line.as_ptr());
            let pred = VW_Predict(instance.0, ex);
            VW_FinishExample(instance.0, ex);
            pred
        };

        Ok(f64::from(pred))
    }
}

impl Drop for VwModel {
    fn drop(&mut self) {
        let instance = self.instance.get_mut();
        // SAFETY: drop runs once, after every other reference is gone.
        unsafe { VW_Finish(instance.0) };
    }
}
