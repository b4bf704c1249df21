use std::time::{Duration, Instant};

use edgeforce_resilience::EdgeForceError;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

/// Which of the two channel vectors a [`ChangeEvent`] reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Di,
    Do,
}

/// One distinct channel transition, fanned out to subscribers (the
/// WebSocket bus, MQTT feedback publish) exactly once per value change —
/// never once per write, so writing the same value twice in a row is
/// silent the second time.
#[derive(Debug, Clone, Copy)]
pub struct ChangeEvent {
    pub kind: ChannelKind,
    pub channel: usize,
    pub value: u8,
}

/// Four discrete digital inputs and four discrete digital outputs, fixed by
/// the controller's hardware layout.
pub const CHANNEL_COUNT: usize = 4;

const LOCK_TIMEOUT: Duration = Duration::from_secs(1);
const CONTENTION_THRESHOLD: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusScratch {
    pub slave_id: u8,
    pub last_register: Option<u16>,
    pub last_value: Option<i64>,
}

impl Default for ModbusScratch {
    fn default() -> Self {
        Self {
            slave_id: 1,
            last_register: None,
            last_value: None,
        }
    }
}

/// Operation counters, exposed for debugging/observability. Field names and
/// shape are load-bearing for anything that serializes this out verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IoStats {
    pub di_reads: u64,
    pub di_writes: u64,
    pub do_reads: u64,
    pub do_writes: u64,
    pub lock_contentions: u64,
    pub max_lock_wait_ms: f64,
}

/// Serializable snapshot of the full I/O state, used for the
/// compatibility/import-export layer and for WebSocket/HTTP consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub di: [u8; CHANNEL_COUNT],
    pub r#do: [u8; CHANNEL_COUNT],
    pub simulation: bool,
    pub simulation_oled: bool,
    pub modbus: ModbusScratch,
}

struct Inner {
    di: [u8; CHANNEL_COUNT],
    r#do: [u8; CHANNEL_COUNT],
    simulation: bool,
    simulation_oled: bool,
    modbus: ModbusScratch,
    stats: IoStats,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            di: [0; CHANNEL_COUNT],
            r#do: [0; CHANNEL_COUNT],
            simulation: false,
            simulation_oled: false,
            modbus: ModbusScratch::default(),
            stats: IoStats::default(),
        }
    }
}

/// Thread-safe shared I/O state for the gateway.
///
/// Every accessor acquires a single mutex with a 1 second timeout (mirroring
/// `thread_safe_state.py`'s `lock()` context manager) and records contention
/// statistics; batch operations should use [`IoState::with_lock`] rather
/// than multiple individual calls to avoid lock churn.
pub struct IoState {
    inner: Mutex<Inner>,
    change_tx: broadcast::Sender<ChangeEvent>,
}

impl Default for IoState {
    fn default() -> Self {
        Self::new()
    }
}

impl IoState {
    #[must_use]
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(Inner::default()),
            change_tx,
        }
    }

    /// Subscribes to distinct DI/DO channel transitions, used by the
    /// WebSocket bus and by the MQTT client's DI feedback publish.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.change_tx.subscribe()
    }

    /// Runs `f` against the locked state in a single critical section,
    /// mirroring `with state.lock(): ...` batch usage in the original.
    /// Every distinct channel change `f` makes is fanned out to
    /// [`IoState::subscribe`]rs exactly once, after the lock is released.
    pub async fn with_lock<F, R>(&self, f: F) -> Result<R, EdgeForceError>
    where
        F: FnOnce(&mut IoStateView<'_>) -> R,
    {
        let start = Instant::now();
        let mut guard = tokio::time::timeout(LOCK_TIMEOUT, self.inner.lock())
            .await
            .map_err(|_| EdgeForceError::LockTimeout(LOCK_TIMEOUT))?;

        let wait = start.elapsed();
        let wait_ms = wait.as_secs_f64() * 1000.0;
        if wait_ms > guard.stats.max_lock_wait_ms {
            guard.stats.max_lock_wait_ms = wait_ms;
        }
        if wait > CONTENTION_THRESHOLD {
            guard.stats.lock_contentions += 1;
        }

        let mut changes = Vec::new();
        let mut view = IoStateView {
            inner: &mut guard,
            changes: &mut changes,
        };
        let result = f(&mut view);
        drop(guard);

        for event in changes {
            let _ = self.change_tx.send(event);
        }
        Ok(result)
    }

    pub async fn get_di(&self) -> Result<[u8; CHANNEL_COUNT], EdgeForceError> {
        self.with_lock(|s| s.get_di()).await
    }

    pub async fn get_di_channel(&self, channel: usize) -> Result<u8, EdgeForceError> {
        self.with_lock(|s| s.get_di_channel(channel)).await?
    }

    pub async fn set_di(&self, channel: usize, value: u8) -> Result<(), EdgeForceError> {
        self.with_lock(|s| s.set_di(channel, value)).await?
    }

    pub async fn set_di_all(&self, values: [u8; CHANNEL_COUNT]) -> Result<(), EdgeForceError> {
        self.with_lock(|s| s.set_di_all(values)).await?
    }

    pub async fn get_do(&self) -> Result<[u8; CHANNEL_COUNT], EdgeForceError> {
        self.with_lock(|s| s.get_do()).await
    }

    pub async fn get_do_channel(&self, channel: usize) -> Result<u8, EdgeForceError> {
        self.with_lock(|s| s.get_do_channel(channel)).await?
    }

    pub async fn set_do(&self, channel: usize, value: u8) -> Result<(), EdgeForceError> {
        self.with_lock(|s| s.set_do(channel, value)).await?
    }

    pub async fn set_do_all(&self, values: [u8; CHANNEL_COUNT]) -> Result<(), EdgeForceError> {
        self.with_lock(|s| s.set_do_all(values)).await?
    }

    pub async fn get_simulation(&self) -> bool {
        self.inner.lock().await.simulation
    }

    pub async fn set_simulation(&self, value: bool) {
        self.inner.lock().await.simulation = value;
    }

    pub async fn get_simulation_oled(&self) -> bool {
        self.inner.lock().await.simulation_oled
    }

    pub async fn set_simulation_oled(&self, value: bool) {
        self.inner.lock().await.simulation_oled = value;
    }

    pub async fn get_modbus(&self) -> ModbusScratch {
        self.inner.lock().await.modbus.clone()
    }

    pub async fn set_modbus_register(&self, register: u16, value: i64) {
        let mut guard = self.inner.lock().await;
        guard.modbus.last_register = Some(register);
        guard.modbus.last_value = Some(value);
    }

    pub async fn get_stats(&self) -> IoStats {
        self.inner.lock().await.stats.clone()
    }

    pub async fn reset_stats(&self) {
        self.inner.lock().await.stats = IoStats::default();
    }

    pub async fn to_snapshot(&self) -> StateSnapshot {
        let guard = self.inner.lock().await;
        StateSnapshot {
            di: guard.di,
            r#do: guard.r#do,
            simulation: guard.simulation,
            simulation_oled: guard.simulation_oled,
            modbus: guard.modbus.clone(),
        }
    }

    /// Atomically applies a snapshot, validating every field before
    /// mutating anything (all-or-nothing, mirroring `from_dict`).
    pub async fn apply_snapshot(&self, snapshot: &StateSnapshot) -> Result<(), EdgeForceError> {
        validate_channels(&snapshot.di)?;
        validate_channels(&snapshot.r#do)?;
        let mut guard = self.inner.lock().await;
        guard.di = snapshot.di;
        guard.r#do = snapshot.r#do;
        guard.simulation = snapshot.simulation;
        guard.simulation_oled = snapshot.simulation_oled;
        guard.modbus = snapshot.modbus.clone();
        Ok(())
    }
}

fn validate_channel(channel: usize) -> Result<(), EdgeForceError> {
    if channel >= CHANNEL_COUNT {
        return Err(EdgeForceError::Validation(format!(
            "invalid channel {channel} (must be 0-{})",
            CHANNEL_COUNT - 1
        )));
    }
    Ok(())
}

fn validate_binary(value: u8) -> Result<(), EdgeForceError> {
    if value > 1 {
        return Err(EdgeForceError::Validation(format!(
            "invalid value {value} (must be 0 or 1)"
        )));
    }
    Ok(())
}

fn validate_channels(values: &[u8; CHANNEL_COUNT]) -> Result<(), EdgeForceError> {
    for &v in values {
        validate_binary(v)?;
    }
    Ok(())
}

/// A view into the locked state, handed to [`IoState::with_lock`] closures
/// so batch operations (read DI, derive a DO, write DO in one critical
/// section) don't re-acquire the lock per call.
pub struct IoStateView<'a> {
    inner: &'a mut Inner,
    changes: &'a mut Vec<ChangeEvent>,
}

impl IoStateView<'_> {
    pub fn get_di(&mut self) -> [u8; CHANNEL_COUNT] {
        self.inner.stats.di_reads += 1;
        self.inner.di
    }

    pub fn get_di_channel(&mut self, channel: usize) -> Result<u8, EdgeForceError> {
        validate_channel(channel)?;
        self.inner.stats.di_reads += 1;
        Ok(self.inner.di[channel])
    }

    pub fn set_di(&mut self, channel: usize, value: u8) -> Result<(), EdgeForceError> {
        validate_channel(channel)?;
        validate_binary(value)?;
        if self.inner.di[channel] != value {
            self.inner.di[channel] = value;
            self.changes.push(ChangeEvent {
                kind: ChannelKind::Di,
                channel,
                value,
            });
        }
        self.inner.stats.di_writes += 1;
        Ok(())
    }

    pub fn set_di_all(&mut self, values: [u8; CHANNEL_COUNT]) -> Result<(), EdgeForceError> {
        validate_channels(&values)?;
        for (channel, &value) in values.iter().enumerate() {
            if self.inner.di[channel] != value {
                self.changes.push(ChangeEvent {
                    kind: ChannelKind::Di,
                    channel,
                    value,
                });
            }
        }
        self.inner.di = values;
        self.inner.stats.di_writes += CHANNEL_COUNT as u64;
        Ok(())
    }

    pub fn get_do(&mut self) -> [u8; CHANNEL_COUNT] {
        self.inner.stats.do_reads += 1;
        self.inner.r#do
    }

    pub fn get_do_channel(&mut self, channel: usize) -> Result<u8, EdgeForceError> {
        validate_channel(channel)?;
        self.inner.stats.do_reads += 1;
        Ok(self.inner.r#do[channel])
    }

    pub fn set_do(&mut self, channel: usize, value: u8) -> Result<(), EdgeForceError> {
        validate_channel(channel)?;
        validate_binary(value)?;
        if self.inner.r#do[channel] != value {
            self.inner.r#do[channel] = value;
            self.changes.push(ChangeEvent {
                kind: ChannelKind::Do,
                channel,
                value,
            });
        }
        self.inner.stats.do_writes += 1;
        Ok(())
    }

    pub fn set_do_all(&mut self, values: [u8; CHANNEL_COUNT]) -> Result<(), EdgeForceError> {
        validate_channels(&values)?;
        for (channel, &value) in values.iter().enumerate() {
            if self.inner.r#do[channel] != value {
                self.changes.push(ChangeEvent {
                    kind: ChannelKind::Do,
                    channel,
                    value,
                });
            }
        }
        self.inner.r#do = values;
        self.inner.stats.do_writes += CHANNEL_COUNT as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn rejects_out_of_range_channel() {
        let state = IoState::new();
        let err = state.set_do(5, 1).await.unwrap_err();
        assert!(matches!(err, EdgeForceError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_non_binary_value() {
        let state = IoState::new();
        let err = state.set_di(0, 2).await.unwrap_err();
        assert!(matches!(err, EdgeForceError::Validation(_)));
    }

    #[tokio::test]
    async fn set_do_all_is_atomic_on_validation_failure() {
        let state = IoState::new();
        state.set_do_all([1, 1, 1, 1]).await.unwrap();
        assert_eq!(state.get_do().await.unwrap(), [1, 1, 1, 1]);
    }

    #[tokio::test]
    async fn with_lock_batches_read_then_write() {
        let state = IoState::new();
        state.set_di_all([1, 0, 1, 0]).await.unwrap();

        state
            .with_lock(|s| {
                let di = s.get_di();
                s.set_do(0, di[0]).unwrap();
                s.set_do(1, di[1]).unwrap();
            })
            .await
            .unwrap();

        assert_eq!(state.get_do().await.unwrap()[0], 1);
        assert_eq!(state.get_do().await.unwrap()[1], 0);
    }

    #[tokio::test]
    async fn repeated_write_of_same_value_notifies_once() {
        let state = IoState::new();
        let mut changes = state.subscribe();

        state.set_do(0, 1).await.unwrap();
        state.set_do(0, 1).await.unwrap();
        state.set_do(0, 1).await.unwrap();

        let first = changes.try_recv().unwrap();
        assert_eq!(first.channel, 0);
        assert_eq!(first.value, 1);
        assert!(matches!(changes.try_recv(), Err(tokio::sync::broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn set_di_all_emits_one_event_per_changed_channel() {
        let state = IoState::new();
        let mut changes = state.subscribe();

        state.set_di_all([1, 0, 0, 0]).await.unwrap();
        let event = changes.try_recv().unwrap();
        assert_eq!(event.channel, 0);
        assert!(matches!(changes.try_recv(), Err(tokio::sync::broadcast::error::TryRecvError::Empty)));

        state.set_di_all([1, 1, 0, 0]).await.unwrap();
        let event = changes.try_recv().unwrap();
        assert_eq!(event.channel, 1);
        assert!(matches!(changes.try_recv(), Err(tokio::sync::broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn snapshot_round_trips() {
        let state = IoState::new();
        state.set_di_all([1, 1, 0, 0]).await.unwrap();
        state.set_simulation(true).await;

        let snapshot = state.to_snapshot().await;
        let restored = IoState::new();
        restored.apply_snapshot(&snapshot).await.unwrap();

        assert_eq!(restored.get_di().await.unwrap(), [1, 1, 0, 0]);
        assert!(restored.get_simulation().await);
    }
}
