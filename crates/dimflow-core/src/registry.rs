use std::sync::{Arc, OnceLock, RwLock};

use crate::backend::{as_host_scalar, Backend, NativeHandle, HOST};
use crate::config;
use crate::error::{Error, Result};

// Registry — Process-wide list of available backends
//
// Backends register once at startup. For each operation, `choose_backend`
// inspects the native buffers the operands reference and picks the one
// backend that will execute it:
//
//   1. Host constants are ignored; they bind to whatever backend runs.
//   2. Buffers holding data win over placeholders.
//   3. One candidate backend: use it.
//   4. Several: use one that can import all the others without a copy,
//      preferring the default backend. Otherwise fail; converting between
//      backends is an explicit operation (`convert`).
//   5. No candidate: the default backend.

static REGISTRY: OnceLock<RwLock<Vec<Arc<dyn Backend>>>> = OnceLock::new();

fn registry() -> &'static RwLock<Vec<Arc<dyn Backend>>> {
    REGISTRY.get_or_init(|| RwLock::new(Vec::new()))
}

fn poisoned() -> Error {
    Error::msg("dimflow backend registry lock poisoned")
}

/// Register a backend, replacing any backend with the same name.
///
/// If a seed is configured the backend is seeded immediately.
pub fn register_backend(backend: Arc<dyn Backend>) -> Result<()> {
    if let Some(seed) = config::config().seed {
        backend.seed(seed);
    }
    let mut list = registry().write().map_err(|_| poisoned())?;
    log::debug!("registering backend '{}'", backend.name());
    list.retain(|b| b.name() != backend.name());
    list.push(backend);
    Ok(())
}

/// All registered backends, in registration order.
pub fn backends() -> Result<Vec<Arc<dyn Backend>>> {
    Ok(registry().read().map_err(|_| poisoned())?.clone())
}

/// Look up a registered backend by name.
pub fn backend(name: &str) -> Result<Arc<dyn Backend>> {
    registry()
        .read()
        .map_err(|_| poisoned())?
        .iter()
        .find(|b| b.name() == name)
        .cloned()
        .ok_or_else(|| Error::NoCompatibleBackend {
            backends: vec![name.to_string()],
        })
}

/// Make the registered backend `name` the default.
pub fn set_default_backend(name: &str) -> Result<()> {
    backend(name)?;
    log::debug!("default backend set to '{name}'");
    config::update(|c| c.default_backend = Some(name.to_string()))
}

/// The configured default backend, or the first registered one.
pub fn default_backend() -> Result<Arc<dyn Backend>> {
    if let Some(name) = config::config().default_backend {
        match backend(&name) {
            Ok(b) => return Ok(b),
            Err(_) => log::trace!("default backend '{name}' is not registered"),
        }
    }
    registry()
        .read()
        .map_err(|_| poisoned())?
        .first()
        .cloned()
        .ok_or_else(|| Error::NoCompatibleBackend {
            backends: Vec::new(),
        })
}

/// Pick the backend that executes an operation on `natives`.
pub fn choose_backend(natives: &[&NativeHandle]) -> Result<Arc<dyn Backend>> {
    let bound: Vec<&NativeHandle> = natives
        .iter()
        .copied()
        .filter(|n| n.backend_name() != HOST)
        .collect();
    let holding_data: Vec<&NativeHandle> = bound
        .iter()
        .copied()
        .filter(|n| !n.is_placeholder())
        .collect();
    let candidates = if holding_data.is_empty() {
        &bound
    } else {
        &holding_data
    };

    let mut names: Vec<&str> = Vec::new();
    for n in candidates {
        if !names.contains(&n.backend_name()) {
            names.push(n.backend_name());
        }
    }

    match names.as_slice() {
        [] => default_backend(),
        [name] => backend(name),
        _ => {
            let default = default_backend().ok();
            let mut options: Vec<Arc<dyn Backend>> = Vec::new();
            if let Some(d) = default.filter(|d| names.contains(&d.name())) {
                options.push(d);
            }
            for name in &names {
                if let Ok(b) = backend(name) {
                    options.push(b);
                }
            }
            let chosen = options.into_iter().find(|b| {
                names
                    .iter()
                    .all(|other| *other == b.name() || b.can_import(other))
            });
            match chosen {
                Some(b) => {
                    log::trace!("backend '{}' chosen for operands on {:?}", b.name(), names);
                    Ok(b)
                }
                None => Err(Error::NoCompatibleBackend {
                    backends: names.iter().map(|s| s.to_string()).collect(),
                }),
            }
        }
    }
}

/// Bring `x` onto `backend`: host constants are converted, foreign buffers
/// are imported if the backend supports it.
pub fn adopt(backend: &dyn Backend, x: &NativeHandle) -> Result<NativeHandle> {
    if x.backend_name() == backend.name() {
        return Ok(x.clone());
    }
    if let Some(s) = as_host_scalar(x.as_ref()) {
        return if s.dtype.is_complex() {
            backend.from_complex(&[s.re], &[s.im], &[], s.dtype)
        } else {
            backend.from_f64(&[s.re], &[], s.dtype)
        };
    }
    if backend.can_import(x.backend_name()) {
        return backend.import(x);
    }
    Err(Error::NoCompatibleBackend {
        backends: vec![backend.name().to_string(), x.backend_name().to_string()],
    })
}
