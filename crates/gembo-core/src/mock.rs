//! Recording device for unit tests

use crate::device::{CreateRequest, Device, DeviceResult};
use crate::domain::Domains;
use nix::errno::Errno;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard};

const PAGE_SHIFT: u32 = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open(u32),
    Create(u32),
    Close(u32),
    Flink(u32),
    MmapOffset(u32),
    Map,
    Unmap,
    SetDomain(u32, Domains, Domains),
    Wait(u32),
}

#[derive(Default)]
struct State {
    next_handle: u32,
    next_name: u32,
    /// Backing store per handle
    objects: HashMap<u32, Box<[u8]>>,
    /// Global name -> size
    names: HashMap<u32, u64>,
    events: Vec<Event>,
    busy_left: u32,
    fail_wait: Option<Errno>,
    fail_offset: Option<Errno>,
    fail_map: Option<Errno>,
    fail_set_domain: Option<Errno>,
    fail_create: Option<Errno>,
}

pub struct MockDevice {
    state: Mutex<State>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_handle: 1,
                next_name: 100,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_next_handle(&self, handle: u32) {
        self.state().next_handle = handle;
    }

    pub fn script_busy(&self, n: u32) {
        self.state().busy_left = n;
    }

    pub fn fail_wait(&self, errno: Errno) {
        self.state().fail_wait = Some(errno);
    }

    pub fn fail_offset_query(&self, errno: Errno) {
        self.state().fail_offset = Some(errno);
    }

    pub fn fail_next_map(&self, errno: Errno) {
        self.state().fail_map = Some(errno);
    }

    pub fn fail_set_domain(&self, errno: Errno) {
        self.state().fail_set_domain = Some(errno);
    }

    pub fn fail_create(&self, errno: Errno) {
        self.state().fail_create = Some(errno);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.state().events.iter().filter(|e| pred(e)).count()
    }

    pub fn close_count(&self) -> usize {
        self.count(|e| matches!(e, Event::Close(_)))
    }

    pub fn map_count(&self) -> usize {
        self.count(|e| *e == Event::Map)
    }

    pub fn unmap_count(&self) -> usize {
        self.count(|e| *e == Event::Unmap)
    }

    pub fn offset_query_count(&self) -> usize {
        self.count(|e| matches!(e, Event::MmapOffset(_)))
    }

    pub fn flink_count(&self) -> usize {
        self.count(|e| matches!(e, Event::Flink(_)))
    }

    pub fn wait_calls(&self) -> usize {
        self.count(|e| matches!(e, Event::Wait(_)))
    }

    fn insert(state: &mut State, size: u64) -> u32 {
        let handle = state.next_handle;
        state.next_handle += 1;
        state
            .objects
            .insert(handle, vec![0u8; size as usize].into_boxed_slice());
        handle
    }
}

impl Device for MockDevice {
    fn gem_open(&self, name: u32) -> DeviceResult<(u32, u64)> {
        let mut state = self.state();
        state.events.push(Event::Open(name));
        let size = *state.names.get(&name).ok_or(Errno::ENOENT)?;
        Ok((Self::insert(&mut state, size), size))
    }

    fn gem_create(&self, req: &CreateRequest) -> DeviceResult<u32> {
        let mut state = self.state();
        if let Some(errno) = state.fail_create.take() {
            return Err(errno);
        }
        let handle = Self::insert(&mut state, req.size);
        state.events.push(Event::Create(handle));
        Ok(handle)
    }

    fn gem_close(&self, handle: u32) -> DeviceResult<()> {
        let mut state = self.state();
        state.events.push(Event::Close(handle));
        state.objects.remove(&handle).map(|_| ()).ok_or(Errno::EINVAL)
    }

    fn gem_flink(&self, handle: u32) -> DeviceResult<u32> {
        let mut state = self.state();
        state.events.push(Event::Flink(handle));
        let size = state.objects.get(&handle).ok_or(Errno::ENOENT)?.len() as u64;
        let name = state.next_name;
        state.next_name += 1;
        state.names.insert(name, size);
        Ok(name)
    }

    fn gem_mmap_offset(&self, handle: u32, _size: u64) -> DeviceResult<u64> {
        let mut state = self.state();
        state.events.push(Event::MmapOffset(handle));
        if let Some(errno) = state.fail_offset.take() {
            return Err(errno);
        }
        if !state.objects.contains_key(&handle) {
            return Err(Errno::ENOENT);
        }
        Ok(u64::from(handle) << PAGE_SHIFT)
    }

    fn map_region(&self, offset: u64, len: usize) -> DeviceResult<NonNull<u8>> {
        let mut state = self.state();
        if let Some(errno) = state.fail_map.take() {
            return Err(errno);
        }
        let handle = (offset >> PAGE_SHIFT) as u32;
        let store = state.objects.get_mut(&handle).ok_or(Errno::EINVAL)?;
        if len > store.len() {
            return Err(Errno::EINVAL);
        }
        let ptr = NonNull::new(store.as_mut_ptr()).ok_or(Errno::EINVAL)?;
        state.events.push(Event::Map);
        Ok(ptr)
    }

    unsafe fn unmap_region(&self, _ptr: NonNull<u8>, _len: usize) {
        self.state().events.push(Event::Unmap);
    }

    fn gem_set_domain(&self, handle: u32, read: Domains, write: Domains) -> DeviceResult<()> {
        let mut state = self.state();
        if let Some(errno) = state.fail_set_domain.take() {
            return Err(errno);
        }
        state.events.push(Event::SetDomain(handle, read, write));
        Ok(())
    }

    fn gem_wait_idle(&self, handle: u32) -> DeviceResult<()> {
        let mut state = self.state();
        state.events.push(Event::Wait(handle));
        if let Some(errno) = state.fail_wait.take() {
            return Err(errno);
        }
        if state.busy_left > 0 {
            state.busy_left -= 1;
            return Err(Errno::EBUSY);
        }
        Ok(())
    }
}
