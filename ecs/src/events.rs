//! Typed publish/subscribe event bus.
//!
//! Every event type owns an [`EventChannel`] with two alternating queues.
//! Producers append to the *recording* queue; [`EventChannel::dispatch`]
//! sorts it by descending [`EventPriority`], publishes it to every live
//! [`EventReader`] and recycles the previously published buffer as the next
//! recording queue.
//!
//! # Usage pattern
//!
//! 1. Obtain a reader: `registry.get_event_reader::<Hit>()`
//! 2. Produce: `registry.emit_event(Hit(3), EventPriority::High)`
//! 3. Publish: `registry.dispatch_events()` (the [`Schedule`](crate::Schedule)
//!    does this at the end of every frame)
//! 4. Consume: `reader.read()` returns each unseen event once
//!
//! Events sent with `send_immediate` are visible to every reader without
//! waiting for a dispatch. They are also recorded, so the next dispatch
//! publishes them like any other event; a reader that already returned one
//! does not see it again.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

/// Bound shared by every event payload type.
pub trait EventData: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> EventData for T {}

/// Delivery priority. Published queues are ordered highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// An event value with its delivery metadata.
#[derive(Debug, Clone)]
pub struct Event<T> {
    pub value: T,
    pub priority: EventPriority,
    /// When the event was produced.
    pub timestamp: Instant,
    /// The thread that produced the event.
    pub thread: ThreadId,
    /// Set for events sent with `send_immediate`.
    immediate_id: Option<u64>,
}

impl<T> Event<T> {
    /// Wraps `value`, stamping it with the current time and thread.
    pub fn new(value: T, priority: EventPriority) -> Self {
        Self {
            value,
            priority,
            timestamp: Instant::now(),
            thread: std::thread::current().id(),
            immediate_id: None,
        }
    }

    /// Time elapsed since the event was produced.
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// A predicate a reader applies to every event it returns.
pub enum EventFilter<T> {
    /// Keeps events at or above the given priority.
    MinPriority(EventPriority),
    /// Keeps events younger than the given age at read time.
    MaxAge(Duration),
    /// Keeps events produced on the given thread.
    SourceThread(ThreadId),
    Custom(Box<dyn Fn(&Event<T>) -> bool + Send + Sync>),
}

impl<T> EventFilter<T> {
    /// Builds a [`EventFilter::Custom`] filter from a closure.
    pub fn custom(predicate: impl Fn(&Event<T>) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Box::new(predicate))
    }

    /// Returns whether `event` passes this filter.
    pub fn accepts(&self, event: &Event<T>) -> bool {
        match self {
            Self::MinPriority(min) => event.priority >= *min,
            Self::MaxAge(max) => event.age() <= *max,
            Self::SourceThread(thread) => event.thread == *thread,
            Self::Custom(predicate) => predicate(event),
        }
    }
}

impl<T> std::fmt::Debug for EventFilter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MinPriority(p) => f.debug_tuple("MinPriority").field(p).finish(),
            Self::MaxAge(d) => f.debug_tuple("MaxAge").field(d).finish(),
            Self::SourceThread(t) => f.debug_tuple("SourceThread").field(t).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Stable sort, highest priority first.
fn sort_by_priority<T>(events: &mut [Event<T>]) {
    events.sort_by(|a, b| b.priority.cmp(&a.priority));
}

struct ReaderState<T> {
    /// Snapshot of the channel's published queue at the last refresh.
    published: Arc<Vec<Event<T>>>,
    cursor: usize,
    /// Immediate deliveries not yet read.
    inbox: Vec<Event<T>>,
    /// Ids of immediate events this reader has already returned.
    seen: Vec<u64>,
}

impl<T> ReaderState<T> {
    fn is_seen(&self, event: &Event<T>) -> bool {
        event.immediate_id.is_some_and(|id| self.seen.contains(&id))
    }

    fn mark_seen<'a>(&mut self, events: impl IntoIterator<Item = &'a Event<T>>)
    where
        T: 'a,
    {
        self.seen
            .extend(events.into_iter().filter_map(|e| e.immediate_id));
    }
}

struct ChannelState<T> {
    recording: Vec<Event<T>>,
    published: Arc<Vec<Event<T>>>,
    readers: Vec<Weak<Mutex<ReaderState<T>>>>,
    next_immediate_id: u64,
}

/// The double-buffered queue pair for one event type.
pub struct EventChannel<T: EventData> {
    state: Mutex<ChannelState<T>>,
}

impl<T: EventData> EventChannel<T> {
    /// Creates a new empty channel.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState {
                recording: Vec::new(),
                published: Arc::new(Vec::new()),
                readers: Vec::new(),
                next_immediate_id: 0,
            }),
        }
    }

    /// Appends an event to the recording queue.
    pub fn send(&self, value: T, priority: EventPriority) {
        self.send_event(Event::new(value, priority));
    }

    /// Appends a prebuilt event to the recording queue.
    pub fn send_event(&self, mut event: Event<T>) {
        event.immediate_id = None;
        self.state.lock().recording.push(event);
    }

    /// Publishes an event right away.
    ///
    /// The event is inserted into the published queue after every event of
    /// equal or higher priority, and delivered to each live reader so that
    /// its next [`EventReader::read`] returns it. It is recorded as well and
    /// republished by the next [`dispatch`](Self::dispatch) for readers that
    /// have not returned it yet.
    pub fn send_immediate(&self, value: T, priority: EventPriority) {
        let mut event = Event::new(value, priority);
        let mut state = self.state.lock();
        event.immediate_id = Some(state.next_immediate_id);
        state.next_immediate_id += 1;
        state.recording.push(event.clone());

        let published = Arc::make_mut(&mut state.published);
        let at = published.partition_point(|e| e.priority >= event.priority);
        published.insert(at, event.clone());

        state.readers.retain(|weak| match weak.upgrade() {
            Some(reader) => {
                reader.lock().inbox.push(event.clone());
                true
            }
            None => false,
        });
    }

    /// Publishes the recording queue and flips buffers. Returns the number
    /// of events published.
    pub fn dispatch(&self) -> usize {
        let mut state = self.state.lock();
        let mut batch = std::mem::take(&mut state.recording);
        sort_by_priority(&mut batch);
        let count = batch.len();

        let previous = std::mem::replace(&mut state.published, Arc::new(batch));
        let published = Arc::clone(&state.published);
        state.readers.retain(|weak| match weak.upgrade() {
            Some(reader) => {
                let mut reader = reader.lock();
                reader.published = Arc::clone(&published);
                reader.cursor = 0;
                reader.inbox.clear();
                reader
                    .seen
                    .retain(|id| published.iter().any(|e| e.immediate_id == Some(*id)));
                true
            }
            None => false,
        });

        // The old published buffer becomes the next recording queue once no
        // reader snapshot holds it any more.
        if let Ok(mut buffer) = Arc::try_unwrap(previous) {
            buffer.clear();
            state.recording = buffer;
        }
        count
    }

    /// Creates a reader positioned at the start of the published queue.
    pub fn reader(self: &Arc<Self>) -> EventReader<T> {
        let mut state = self.state.lock();
        let reader_state = Arc::new(Mutex::new(ReaderState {
            published: Arc::clone(&state.published),
            cursor: 0,
            inbox: Vec::new(),
            seen: Vec::new(),
        }));
        state.readers.push(Arc::downgrade(&reader_state));
        EventReader {
            state: reader_state,
            channel: Arc::downgrade(self),
            filters: Vec::new(),
        }
    }

    /// Events waiting in the recording queue.
    pub fn pending_count(&self) -> usize {
        self.state.lock().recording.len()
    }

    /// Events in the current published queue.
    pub fn published_count(&self) -> usize {
        self.state.lock().published.len()
    }

    /// Readers whose handles are still alive.
    pub fn reader_count(&self) -> usize {
        self.state
            .lock()
            .readers
            .iter()
            .filter(|r| r.strong_count() > 0)
            .count()
    }

    /// Drops every queued and published event. Readers stay subscribed.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.recording.clear();
        state.published = Arc::new(Vec::new());
        state.readers.retain(|weak| match weak.upgrade() {
            Some(reader) => {
                let mut reader = reader.lock();
                reader.published = Arc::new(Vec::new());
                reader.cursor = 0;
                reader.inbox.clear();
                reader.seen.clear();
                true
            }
            None => false,
        });
    }
}

impl<T: EventData> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscription handle for one event type.
///
/// The channel tracks readers through weak references only: dropping the
/// handle unsubscribes it.
pub struct EventReader<T: EventData> {
    state: Arc<Mutex<ReaderState<T>>>,
    channel: Weak<EventChannel<T>>,
    filters: Vec<EventFilter<T>>,
}

impl<T: EventData> EventReader<T> {
    /// Returns every event not yet seen by this reader, highest priority
    /// first, and marks them as read.
    ///
    /// Events rejected by the filter chain are consumed as well.
    pub fn read(&mut self) -> Vec<Event<T>> {
        let mut state = self.state.lock();
        let start = state.cursor.min(state.published.len());
        let mut events: Vec<_> = state.published[start..]
            .iter()
            .filter(|e| !state.is_seen(e))
            .cloned()
            .collect();
        state.cursor = state.published.len();
        let inbox = std::mem::take(&mut state.inbox);
        if !inbox.is_empty() {
            events.extend(inbox.into_iter().filter(|e| !state.is_seen(e)));
            sort_by_priority(&mut events);
        }
        state.mark_seen(&events);
        drop(state);

        events.retain(|e| self.filters.iter().all(|f| f.accepts(e)));
        events
    }

    /// Like [`read`](Self::read) but returns the bare values.
    pub fn read_values(&mut self) -> Vec<T> {
        self.read().into_iter().map(|e| e.value).collect()
    }

    /// Number of unseen events before filtering.
    pub fn unread_count(&self) -> usize {
        let state = self.state.lock();
        let start = state.cursor.min(state.published.len());
        state.published[start..]
            .iter()
            .chain(&state.inbox)
            .filter(|e| !state.is_seen(e))
            .count()
    }

    /// Marks everything currently visible as read.
    pub fn skip_all(&mut self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let start = state.cursor.min(state.published.len());
        let published = Arc::clone(&state.published);
        state.mark_seen(&published[start..]);
        let inbox = std::mem::take(&mut state.inbox);
        state.mark_seen(&inbox);
        state.cursor = published.len();
    }

    /// Adds a filter to the chain and returns the reader.
    pub fn with_filter(mut self, filter: EventFilter<T>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn add_filter(&mut self, filter: EventFilter<T>) {
        self.filters.push(filter);
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
    }

    /// Another handle on the same subscription, without filters.
    pub(crate) fn share(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            channel: Weak::clone(&self.channel),
            filters: Vec::new(),
        }
    }

    /// Whether the channel this reader subscribed to still exists.
    pub fn is_connected(&self) -> bool {
        self.channel.strong_count() > 0
    }
}

/// Cloneable producer handle, usable from other threads.
pub struct EventSender<T: EventData> {
    channel: Arc<EventChannel<T>>,
}

impl<T: EventData> EventSender<T> {
    /// Queues `value` with [`EventPriority::Normal`].
    pub fn send(&self, value: T) {
        self.channel.send(value, EventPriority::Normal);
    }

    pub fn send_with_priority(&self, value: T, priority: EventPriority) {
        self.channel.send(value, priority);
    }

    pub fn send_immediate(&self, value: T, priority: EventPriority) {
        self.channel.send_immediate(value, priority);
    }
}

impl<T: EventData> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
        }
    }
}

/// Object-safe view of an [`EventChannel`] held by the [`EventBus`].
trait ErasedChannel: Any + Send + Sync {
    fn dispatch(&self) -> usize;
    fn clear(&self);
    fn type_name(&self) -> &'static str;
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: EventData> ErasedChannel for EventChannel<T> {
    fn dispatch(&self) -> usize {
        EventChannel::dispatch(self)
    }

    fn clear(&self) {
        EventChannel::clear(self);
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Map from event type to its channel.
///
/// Channels are created on first use and live as long as the bus. All
/// methods take `&self`; the map is guarded by a `RwLock` and each channel
/// by its own `Mutex`.
#[derive(Default)]
pub struct EventBus {
    channels: RwLock<HashMap<TypeId, Arc<dyn ErasedChannel>>>,
}

impl EventBus {
    /// Creates a new bus without channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the channel for `T`, creating it if needed.
    pub fn channel<T: EventData>(&self) -> Arc<EventChannel<T>> {
        if let Some(channel) = self.get_channel::<T>() {
            return channel;
        }
        let erased = Arc::clone(
            self.channels
                .write()
                .entry(TypeId::of::<T>())
                .or_insert_with(|| {
                    log::debug!("Creating event channel for {}", type_name::<T>());
                    Arc::new(EventChannel::<T>::new())
                }),
        );
        downcast_channel(erased)
    }

    /// Returns the channel for `T` if it exists.
    pub fn get_channel<T: EventData>(&self) -> Option<Arc<EventChannel<T>>> {
        let erased = Arc::clone(self.channels.read().get(&TypeId::of::<T>())?);
        Some(downcast_channel(erased))
    }

    /// Whether a channel for `T` exists.
    pub fn contains<T: EventData>(&self) -> bool {
        self.channels.read().contains_key(&TypeId::of::<T>())
    }

    /// Queues an event for the next dispatch.
    pub fn send<T: EventData>(&self, value: T, priority: EventPriority) {
        self.channel::<T>().send(value, priority);
    }

    /// Publishes an event without waiting for a dispatch.
    pub fn send_immediate<T: EventData>(&self, value: T, priority: EventPriority) {
        self.channel::<T>().send_immediate(value, priority);
    }

    pub fn reader<T: EventData>(&self) -> EventReader<T> {
        self.channel::<T>().reader()
    }

    pub fn sender<T: EventData>(&self) -> EventSender<T> {
        EventSender {
            channel: self.channel::<T>(),
        }
    }

    /// Dispatches every channel. Returns the total number of events
    /// published.
    pub fn dispatch(&self) -> usize {
        let channels: Vec<_> = self.channels.read().values().cloned().collect();
        let total = channels.iter().map(|c| c.dispatch()).sum();
        if total > 0 {
            log::debug!(
                "Dispatched {total} events over {} channels",
                channels.len()
            );
        }
        total
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Type names of every channel, in no particular order.
    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.read().values().map(|c| c.type_name()).collect()
    }

    /// Drops all queued and published events in every channel.
    pub fn clear(&self) {
        for channel in self.channels.read().values() {
            channel.clear();
        }
    }
}

fn downcast_channel<T: EventData>(erased: Arc<dyn ErasedChannel>) -> Arc<EventChannel<T>> {
    erased
        .as_any_arc()
        .downcast::<EventChannel<T>>()
        .unwrap_or_else(|_| unreachable!("event channel stored under a mismatched TypeId"))
}
