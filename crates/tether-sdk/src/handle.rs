//! Native resource registry
//!
//! Associates native pointers with host-visible wrapper objects and runs each
//! resource's destructor exactly once.
//!
//! Per resource the lifecycle is:
//!
//! ```text
//! Registered ──finalize──▶ Finalized
//!     │                        ▲
//!     └─finalize while pinned──▶ Finalizing ──last unpin──┘
//! ```
//!
//! Native calls pin the handles they operate on. A finalize request arriving
//! while a handle is pinned is deferred until the last pin is released.
//! Finalized entries are removed; handle ids are never reused, so an unknown
//! id always reads as finalized.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::context::{HostEnv, ReferenceId};
use crate::error::{BridgeError, BridgeResult};
use crate::value::{HostValue, ResourceType};

// ============================================================================
// Handles
// ============================================================================

/// Registry-unique handle identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    /// Raw id, as stored in the host wrapper's tag
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Host-visible handle to one registered native resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    id: HandleId,
    resource: ResourceType,
}

impl Handle {
    /// Registry identifier
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Type of the resource behind the handle
    pub fn resource(&self) -> ResourceType {
        self.resource
    }
}

/// Lifecycle state of a registered resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    /// Alive and usable
    Registered,
    /// Finalization requested while pinned; destroyed on the last unpin
    Finalizing,
    /// Destructor has run
    Finalized,
}

// ============================================================================
// Registry internals
// ============================================================================

struct RawPtr(*mut ());

// SAFETY: resources are registered with `T: Send + Sync` bounds and are only
// dereferenced through pinned, borrow-checked accessors.
unsafe impl Send for RawPtr {}

type Destructor = Box<dyn FnOnce() + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Borrow {
    Free,
    Shared(usize),
    Exclusive,
}

struct Entry {
    resource: ResourceType,
    ptr: RawPtr,
    address: usize,
    destructor: Option<Destructor>,
    state: HandleState,
    pins: usize,
    borrow: Borrow,
    wrapper: Option<ReferenceId>,
}

#[derive(Default)]
struct Table {
    entries: HashMap<HandleId, Entry>,
    by_address: HashMap<usize, HandleId>,
}

struct Inner {
    table: Mutex<Table>,
    live: DashMap<ResourceType, usize>,
    next_id: AtomicU64,
}

/// Registry of native resources exposed to the host.
///
/// Cheap to clone; all clones share the same table. Safe to use from any
/// thread, although attaching wrappers requires the host thread.
#[derive(Clone)]
pub struct HandleRegistry {
    inner: Arc<Inner>,
}

impl HandleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(Table::default()),
                live: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a native resource with its destructor.
    ///
    /// Fails with `AlreadyRegistered` if the address is already registered
    /// and not yet finalized. Zero-sized resources share a dangling address
    /// and are exempt from the check.
    ///
    /// Prefer [`register_boxed`](Self::register_boxed), which upholds the
    /// contract below itself.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a valid, initialized `T` that stays valid until
    /// `destructor` runs. The registry becomes its unique owner: nothing else
    /// may access or free the value while it is registered, since borrows
    /// handed out by the registry dereference `ptr` directly.
    pub unsafe fn register<T: Send + Sync + 'static>(
        &self,
        ptr: NonNull<T>,
        destructor: impl FnOnce(NonNull<T>) + Send + 'static,
    ) -> BridgeResult<Handle> {
        let resource = ResourceType::of::<T>();
        let address = ptr.as_ptr() as usize;
        let unique = std::mem::size_of::<T>() != 0;

        let mut table = self.inner.table.lock();
        if unique && table.by_address.contains_key(&address) {
            return Err(BridgeError::AlreadyRegistered { address });
        }

        let id = HandleId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let raw = RawPtr(ptr.as_ptr() as *mut ());
        let owned = RawPtr(ptr.as_ptr() as *mut ());
        let destructor: Destructor = Box::new(move || {
            let owned = owned;
            // SAFETY: the pointer came from a `NonNull<T>`.
            let ptr = unsafe { NonNull::new_unchecked(owned.0 as *mut T) };
            destructor(ptr)
        });

        table.entries.insert(
            id,
            Entry {
                resource,
                ptr: raw,
                address,
                destructor: Some(destructor),
                state: HandleState::Registered,
                pins: 0,
                borrow: Borrow::Free,
                wrapper: None,
            },
        );
        if unique {
            table.by_address.insert(address, id);
        }
        drop(table);

        *self.inner.live.entry(resource).or_insert(0) += 1;
        tracing::debug!(id = id.0, resource = %resource, "registered native resource");
        Ok(Handle { id, resource })
    }

    /// Move a value to the heap and register it; the destructor drops it
    pub fn register_boxed<T: Send + Sync + 'static>(&self, value: T) -> BridgeResult<Handle> {
        let ptr = NonNull::from(Box::leak(Box::new(value)));
        // SAFETY: the leaked box is valid until the destructor reclaims it,
        // and only the registry holds the pointer.
        let registered = unsafe {
            self.register(ptr, |ptr| {
                // SAFETY: `ptr` was produced by `Box::leak` above and the
                // registry calls the destructor at most once.
                drop(Box::from_raw(ptr.as_ptr()));
            })
        };
        registered.map_err(|e| {
            // SAFETY: registration failed, so nothing else owns the box.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
            e
        })
    }

    /// Handle for a raw id taken from a host wrapper, if still alive
    pub fn lookup(&self, raw: u64) -> Option<Handle> {
        let table = self.inner.table.lock();
        table
            .entries
            .get(&HandleId(raw))
            .filter(|e| e.state == HandleState::Registered)
            .map(|e| Handle {
                id: HandleId(raw),
                resource: e.resource,
            })
    }

    /// Current lifecycle state
    pub fn state(&self, handle: Handle) -> HandleState {
        let table = self.inner.table.lock();
        table
            .entries
            .get(&handle.id)
            .map(|e| e.state)
            .unwrap_or(HandleState::Finalized)
    }

    // ========================================================================
    // Host wrappers
    // ========================================================================

    /// Bind a handle to its host wrapper object.
    ///
    /// Registers exactly one host finalizer for the wrapper and keeps a weak
    /// reference to it so later encodings return the same object.
    pub fn attach(&self, env: &dyn HostEnv, handle: Handle, wrapper: HostValue) -> BridgeResult<()> {
        {
            let table = self.inner.table.lock();
            match table.entries.get(&handle.id) {
                Some(entry) if entry.state != HandleState::Registered => {
                    return Err(disposed(handle));
                }
                Some(entry) if entry.wrapper.is_some() => {
                    return Err(BridgeError::mismatch(
                        format!("unattached {}", handle.resource),
                        format!("{} with a wrapper", handle.resource),
                    ));
                }
                Some(_) => {}
                None => return Err(disposed(handle)),
            }
        }

        let weak = env
            .create_reference(wrapper, 0)
            .map_err(|e| BridgeError::from_host(env, e))?;

        let registry = self.clone();
        let finalizer = Box::new(move |env: &dyn HostEnv| {
            registry.release_wrapper(env, handle);
            registry.finalize(handle);
        });
        if let Err(e) = env.wrap(wrapper, handle.id.0, finalizer) {
            let _ = env.delete_reference(weak);
            return Err(BridgeError::from_host(env, e));
        }

        let mut table = self.inner.table.lock();
        if let Some(entry) = table.entries.get_mut(&handle.id) {
            entry.wrapper = Some(weak);
        }
        tracing::debug!(id = handle.id.0, "attached host wrapper");
        Ok(())
    }

    /// The handle's live wrapper object, if it has one
    pub fn wrapper(&self, env: &dyn HostEnv, handle: Handle) -> BridgeResult<Option<HostValue>> {
        let reference = {
            let table = self.inner.table.lock();
            table.entries.get(&handle.id).and_then(|e| e.wrapper)
        };
        match reference {
            Some(reference) => env
                .reference_value(reference)
                .map_err(|e| BridgeError::from_host(env, e)),
            None => Ok(None),
        }
    }

    /// The handle's wrapper, creating a plain one on first exposure
    pub fn expose(&self, env: &dyn HostEnv, handle: Handle) -> BridgeResult<HostValue> {
        if let Some(existing) = self.wrapper(env, handle)? {
            return Ok(existing);
        }
        let wrapper = env.create_object().map_err(|e| BridgeError::from_host(env, e))?;
        self.attach(env, handle, wrapper)?;
        Ok(wrapper)
    }

    fn release_wrapper(&self, env: &dyn HostEnv, handle: Handle) -> Option<HostValue> {
        let reference = {
            let mut table = self.inner.table.lock();
            table.entries.get_mut(&handle.id).and_then(|e| e.wrapper.take())
        }?;
        let value = env.reference_value(reference).ok().flatten();
        let _ = env.delete_reference(reference);
        value
    }

    // ========================================================================
    // Finalization
    // ========================================================================

    /// Request destruction.
    ///
    /// Runs the destructor now, or defers it while the handle is pinned.
    /// Later calls are no-ops.
    pub fn finalize(&self, handle: Handle) -> HandleState {
        let mut table = self.inner.table.lock();
        let entry = match table.entries.get_mut(&handle.id) {
            Some(entry) => entry,
            None => return HandleState::Finalized,
        };

        let (state, pins) = (entry.state, entry.pins);
        match state {
            HandleState::Finalizing => HandleState::Finalizing,
            HandleState::Finalized => HandleState::Finalized,
            HandleState::Registered if pins > 0 => {
                entry.state = HandleState::Finalizing;
                tracing::warn!(
                    id = handle.id.0,
                    pins,
                    "finalization deferred while resource is in use"
                );
                HandleState::Finalizing
            }
            HandleState::Registered => {
                let destructor = Self::remove_entry(&mut table, handle.id);
                drop(table);
                self.destroy(handle, destructor);
                HandleState::Finalized
            }
        }
    }

    /// Destroy early: detach the wrapper (cancelling its host finalizer) and
    /// finalize. Idempotent.
    pub fn dispose(&self, env: &dyn HostEnv, handle: Handle) -> HandleState {
        if let Some(wrapper) = self.release_wrapper(env, handle) {
            let _ = env.remove_wrap(wrapper);
        }
        self.finalize(handle)
    }

    fn remove_entry(table: &mut Table, id: HandleId) -> Option<Destructor> {
        let entry = table.entries.remove(&id)?;
        if table.by_address.get(&entry.address) == Some(&id) {
            table.by_address.remove(&entry.address);
        }
        entry.destructor
    }

    fn destroy(&self, handle: Handle, destructor: Option<Destructor>) {
        if let Some(destructor) = destructor {
            if panic::catch_unwind(AssertUnwindSafe(destructor)).is_err() {
                tracing::error!(id = handle.id.0, resource = %handle.resource, "destructor panicked");
            }
        }
        if let Some(mut count) = self.inner.live.get_mut(&handle.resource) {
            *count = count.saturating_sub(1);
        }
        tracing::debug!(id = handle.id.0, resource = %handle.resource, "finalized native resource");
    }

    // ========================================================================
    // Pinning and access
    // ========================================================================

    /// Pin a handle for the duration of a native call
    pub fn pin(&self, handle: Handle) -> BridgeResult<PinGuard> {
        let mut table = self.inner.table.lock();
        match table.entries.get_mut(&handle.id) {
            Some(entry) if entry.state == HandleState::Registered => {
                entry.pins += 1;
                Ok(PinGuard {
                    registry: self.clone(),
                    handle,
                    borrow: None,
                })
            }
            _ => Err(disposed(handle)),
        }
    }

    fn acquire(&self, handle: Handle, expected: ResourceType, exclusive: bool) -> BridgeResult<(PinGuard, *mut ())> {
        if handle.resource != expected {
            return Err(BridgeError::mismatch(expected.short_name(), handle.resource.short_name()));
        }
        let mut table = self.inner.table.lock();
        let entry = match table.entries.get_mut(&handle.id) {
            Some(entry) if entry.state == HandleState::Registered => entry,
            _ => return Err(disposed(handle)),
        };

        entry.borrow = match (entry.borrow, exclusive) {
            (Borrow::Free, true) => Borrow::Exclusive,
            (Borrow::Free, false) => Borrow::Shared(1),
            (Borrow::Shared(n), false) => Borrow::Shared(n + 1),
            _ => {
                return Err(BridgeError::ResourceBusy {
                    resource: handle.resource.short_name().to_string(),
                })
            }
        };
        entry.pins += 1;
        let ptr = entry.ptr.0;
        Ok((
            PinGuard {
                registry: self.clone(),
                handle,
                borrow: Some(exclusive),
            },
            ptr,
        ))
    }

    /// Run `f` with shared access to the resource
    pub fn with_ref<T: Send + Sync + 'static, R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&T) -> R,
    ) -> BridgeResult<R> {
        let (_guard, ptr) = self.acquire(handle, ResourceType::of::<T>(), false)?;
        // SAFETY: the type was checked, the entry is pinned (not destroyed)
        // and no exclusive borrow is active.
        let value = unsafe { &*(ptr as *const T) };
        Ok(f(value))
    }

    /// Run `f` with exclusive access to the resource
    pub fn with_mut<T: Send + Sync + 'static, R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut T) -> R,
    ) -> BridgeResult<R> {
        let (_guard, ptr) = self.acquire(handle, ResourceType::of::<T>(), true)?;
        // SAFETY: the type was checked, the entry is pinned and no other
        // borrow is active.
        let value = unsafe { &mut *(ptr as *mut T) };
        Ok(f(value))
    }

    fn unpin(&self, handle: Handle, borrow: Option<bool>) {
        let mut table = self.inner.table.lock();
        let entry = match table.entries.get_mut(&handle.id) {
            Some(entry) => entry,
            None => return,
        };
        entry.pins = entry.pins.saturating_sub(1);
        entry.borrow = match (entry.borrow, borrow) {
            (Borrow::Shared(n), Some(false)) if n > 1 => Borrow::Shared(n - 1),
            (_, Some(_)) => Borrow::Free,
            (current, None) => current,
        };

        if entry.pins == 0 && entry.state == HandleState::Finalizing {
            let destructor = Self::remove_entry(&mut table, handle.id);
            drop(table);
            self.destroy(handle, destructor);
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Live instances of `T`
    pub fn live_count<T: 'static>(&self) -> usize {
        self.live_count_of(&ResourceType::of::<T>())
    }

    /// Live instances of a resource type
    pub fn live_count_of(&self, resource: &ResourceType) -> usize {
        self.inner.live.get(resource).map(|c| *c).unwrap_or(0)
    }

    /// Live instances across all resource types
    pub fn total_live(&self) -> usize {
        self.inner.live.iter().map(|c| *c.value()).sum()
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("live", &self.total_live())
            .finish()
    }
}

fn disposed(handle: Handle) -> BridgeError {
    BridgeError::mismatch(
        handle.resource.short_name(),
        format!("disposed {}", handle.resource.short_name()),
    )
}

/// Keeps a handle pinned (and optionally borrowed) until dropped
pub struct PinGuard {
    registry: HandleRegistry,
    handle: Handle,
    borrow: Option<bool>,
}

impl PinGuard {
    /// The pinned handle
    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.registry.unpin(self.handle, self.borrow);
    }
}

impl fmt::Debug for PinGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinGuard").field("handle", &self.handle).finish()
    }
}
