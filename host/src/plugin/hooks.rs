//! Hook Registry
//!
//! Process-wide registry of named extension points ("hooks") and the
//! callbacks plugins register against them. Registration happens during
//! plugin load, which the loader serializes, so insertion order per hook is
//! the plugins' deterministic load order.
//!
//! Firing awaits each callback sequentially in registration order (never in
//! parallel) so ordering-sensitive side effects like menu composition are
//! deterministic. A callback that fails or panics is caught, attributed to
//! its owning plugin in the [`FireReport`], and never prevents subsequent
//! callbacks from running or propagates to the request that triggered the
//! firing.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use parking_lot::RwLock;

use atrium_plugin_api::{HookCallback, HookContext, HookError};

use super::isolation::{catch_unwind_future, extract_panic_message};

/// One callback registered against a hook, keyed by hook name in the
/// registry map
pub struct HookRegistration {
    /// Slug of the plugin that registered the callback
    pub owner: String,

    /// Position within the hook's registration list
    pub order: usize,

    callback: HookCallback,
}

/// Registration info exposed by the inspector (no callback)
#[derive(Debug, Clone, serde::Serialize)]
pub struct HookRegistrationInfo {
    /// Owning plugin slug
    pub owner: String,

    /// Position within the hook's registration list
    pub order: usize,
}

/// A callback failure attributed to its owning plugin
#[derive(Debug)]
pub struct HookFailure {
    /// Slug of the plugin whose callback failed
    pub owner: String,

    /// The caught error
    pub error: HookError,
}

/// Outcome of one hook firing
#[derive(Debug)]
pub struct FireReport {
    /// Hook name that was fired
    pub hook: String,

    /// Number of callbacks invoked
    pub invoked: usize,

    /// Per-callback failures; empty on a clean firing
    pub failures: Vec<HookFailure>,
}

/// Aggregate counters exposed by the hook inspector
#[derive(Debug, Clone, serde::Serialize)]
pub struct HookStats {
    /// Hook name
    pub hook: String,

    /// Number of currently registered callbacks
    pub registrations: usize,

    /// Times the hook has been fired this process
    pub fired: u64,

    /// Callback failures accumulated across firings
    pub failures: u64,
}

#[derive(Default)]
struct FireCounters {
    fired: u64,
    failures: u64,
}

/// Central hook registry
///
/// Mutated only during plugin load (serialized at startup) and targeted
/// removal; firing is read-mostly and safe to run concurrently for multiple
/// requests since each firing receives its own fresh context.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<String, Vec<HookRegistration>>>,
    counters: RwLock<HashMap<String, FireCounters>>,
}

impl HookRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback against a hook, attributed to `owner`.
    ///
    /// Insertion order is preserved for same-hook registrations.
    pub fn on(&self, hook: &str, owner: &str, callback: HookCallback) {
        let mut hooks = self.hooks.write();
        let registrations = hooks.entry(hook.to_string()).or_default();
        let order = registrations.len();
        registrations.push(HookRegistration {
            owner: owner.to_string(),
            order,
            callback,
        });

        tracing::debug!(hook = %hook, owner = %owner, order, "Registered hook callback");
    }

    /// Fire a hook, awaiting each registered callback in registration order.
    ///
    /// Failures (errors and panics alike) are caught per-callback and
    /// reported; they never abort the firing.
    pub async fn fire(&self, hook: &str, ctx: HookContext) -> FireReport {
        let callbacks: Vec<(String, HookCallback)> = self
            .hooks
            .read()
            .get(hook)
            .map(|regs| {
                regs.iter()
                    .map(|r| (r.owner.clone(), r.callback.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut failures = Vec::new();
        for (owner, callback) in &callbacks {
            if let Err(error) = invoke_callback(callback, ctx.clone()).await {
                tracing::warn!(
                    hook = %hook,
                    owner = %owner,
                    error = %error,
                    "Hook callback failed"
                );
                failures.push(HookFailure {
                    owner: owner.clone(),
                    error,
                });
            }
        }

        {
            let mut counters = self.counters.write();
            let entry = counters.entry(hook.to_string()).or_default();
            entry.fired += 1;
            entry.failures += failures.len() as u64;
        }

        FireReport {
            hook: hook.to_string(),
            invoked: callbacks.len(),
            failures,
        }
    }

    /// Remove every callback registered by `owner` across all hooks.
    ///
    /// Returns the number of callbacks removed.
    pub fn remove_owner(&self, owner: &str) -> usize {
        let mut hooks = self.hooks.write();
        let mut removed = 0;
        for registrations in hooks.values_mut() {
            let before = registrations.len();
            registrations.retain(|r| r.owner != owner);
            removed += before - registrations.len();
        }
        hooks.retain(|_, regs| !regs.is_empty());

        if removed > 0 {
            tracing::debug!(owner = %owner, removed, "Removed hook callbacks");
        }
        removed
    }

    /// Remove all registrations and counters (intentional reload).
    pub fn clear(&self) {
        self.hooks.write().clear();
        self.counters.write().clear();
    }

    /// Number of callbacks registered against a hook.
    pub fn registration_count(&self, hook: &str) -> usize {
        self.hooks.read().get(hook).map(Vec::len).unwrap_or(0)
    }

    /// All hook names with at least one registration, sorted.
    pub fn hook_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hooks.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Inspector: registration detail for one hook, in registration order.
    pub fn detail(&self, hook: &str) -> Vec<HookRegistrationInfo> {
        self.hooks
            .read()
            .get(hook)
            .map(|regs| {
                regs.iter()
                    .map(|r| HookRegistrationInfo {
                        owner: r.owner.clone(),
                        order: r.order,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Inspector: aggregate stats for every known hook, sorted by name.
    pub fn stats(&self) -> Vec<HookStats> {
        let hooks = self.hooks.read();
        let counters = self.counters.read();

        let mut names: Vec<&String> = hooks.keys().chain(counters.keys()).collect();
        names.sort();
        names.dedup();

        names
            .into_iter()
            .map(|name| {
                let fire = counters.get(name);
                HookStats {
                    hook: name.clone(),
                    registrations: hooks.get(name).map(Vec::len).unwrap_or(0),
                    fired: fire.map(|c| c.fired).unwrap_or(0),
                    failures: fire.map(|c| c.failures).unwrap_or(0),
                }
            })
            .collect()
    }
}

/// Invoke one callback with panic isolation around both future creation and
/// polling.
async fn invoke_callback(callback: &HookCallback, ctx: HookContext) -> Result<(), HookError> {
    let future = match catch_unwind(AssertUnwindSafe(|| callback(ctx))) {
        Ok(future) => future,
        Err(panic_info) => {
            return Err(HookError::Panic(extract_panic_message(&panic_info)));
        }
    };

    match catch_unwind_future(future).await {
        Ok(result) => result,
        Err(msg) => Err(HookError::Panic(msg)),
    }
}
