use std::{
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::{Child, ChildStdout, Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread,
    time::{Duration, Instant},
};

use crate::{config::AudioConfig, LedCavaError, Result, MAX_LEVEL};

const ANALYZER_BIN: &str = "cava";
/// How long a freshly spawned analyzer gets to crash before we trust it.
const SPAWN_GRACE: Duration = Duration::from_millis(100);
/// Consecutive malformed lines tolerated before a supervised restart.
const RESTART_THRESHOLD: u32 = 10;
/// Minimum spacing between analyzer respawns. Within this window a failure
/// streak only resets the counter, so a flapping analyzer cannot trigger a
/// restart storm.
const RESTART_BACKOFF: Duration = Duration::from_secs(2);
/// Pause after an end-of-stream read so a dead pipe does not spin the
/// reader thread.
const DEAD_STREAM_PAUSE: Duration = Duration::from_millis(20);

/// State shared between the owning handle and the reader thread.
struct Shared {
    levels: Mutex<Vec<u8>>,
    running: AtomicBool,
    /// Slot for the live analyzer child. Locked only to take or store the
    /// handle; kill/wait/spawn always happen with the lock released.
    process: Mutex<Option<Child>>,
}

impl Shared {
    fn lock_levels(&self) -> MutexGuard<'_, Vec<u8>> {
        self.levels.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_process(&self) -> Option<Child> {
        self.process.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn store_process(&self, child: Child) {
        *self.process.lock().unwrap_or_else(|e| e.into_inner()) = Some(child);
    }
}

/// Supervises an external `cava` spectrum analyzer and publishes its most
/// recent per-band output as a snapshot.
///
/// `start` writes a transient analyzer configuration, spawns the process and
/// hands its stdout to a background reader. The reader validates every line,
/// replaces the snapshot on success and escalates sustained parse failures
/// into a full respawn of the analyzer. `get_data` never blocks and always
/// returns a complete vector.
pub struct AudioSource {
    bars: usize,
    framerate: u32,
    config_path: PathBuf,
    shared: Arc<Shared>,
    reader: Option<thread::JoinHandle<()>>,
}

impl AudioSource {
    pub fn new(config: &AudioConfig) -> Self {
        let config_path =
            std::env::temp_dir().join(format!("ledcava_cava_config_{}", std::process::id()));
        Self {
            bars: config.bars,
            framerate: config.framerate,
            config_path,
            shared: Arc::new(Shared {
                levels: Mutex::new(vec![0; config.bars]),
                running: AtomicBool::new(false),
                process: Mutex::new(None),
            }),
            reader: None,
        }
    }

    /// Spawns the analyzer and starts the background reader.
    pub fn start(&mut self) -> Result<()> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        std::fs::write(&self.config_path, render_config(self.bars, self.framerate))?;
        let mut child = spawn_analyzer(&self.config_path)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LedCavaError::SpawnFailure("analyzer stdout not captured".into()))?;

        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.store_process(child);

        let shared = Arc::clone(&self.shared);
        let bars = self.bars;
        let framerate = self.framerate;
        let config_path = self.config_path.clone();
        self.reader = Some(thread::spawn(move || {
            reader_loop(shared, stdout, bars, framerate, &config_path);
        }));

        tracing::info!(bars, framerate, "spectrum analyzer started");
        Ok(())
    }

    /// Returns the most recently published energy vector. Non-blocking; all
    /// zeros until the first line has been accepted.
    pub fn get_data(&self) -> Vec<u8> {
        self.shared.lock_levels().clone()
    }

    /// Stops the analyzer and the reader thread. Safe to call repeatedly;
    /// the last published snapshot stays readable afterwards.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.shared.take_process() {
            let _ = child.kill();
            let _ = child.wait();
            tracing::info!("spectrum analyzer stopped");
        }
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        // A restart racing this stop may have stored a fresh child after the
        // kill above; the reader has exited by now, so sweep the slot again.
        if let Some(mut child) = self.shared.take_process() {
            let _ = child.kill();
            let _ = child.wait();
        }
        let _ = std::fs::remove_file(&self.config_path);
    }

    #[cfg(test)]
    fn publish(&self, values: Vec<u8>) {
        *self.shared.lock_levels() = values;
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSource")
            .field("bars", &self.bars)
            .field("framerate", &self.framerate)
            .finish()
    }
}

/// Renders the transient configuration handed to the analyzer: raw ASCII
/// output on stdout, `;`-separated values capped at [`MAX_LEVEL`], no
/// smoothing so the effects see the raw spectrum.
fn render_config(bars: usize, framerate: u32) -> String {
    format!(
        "[general]\n\
         bars = {bars}\n\
         framerate = {framerate}\n\
         \n\
         [input]\n\
         method = alsa\n\
         source = hw:Loopback,1,0\n\
         channels = stereo\n\
         \n\
         [output]\n\
         method = raw\n\
         raw_target = /dev/stdout\n\
         data_format = ascii\n\
         ascii_max_range = {max}\n\
         \n\
         [smoothing]\n\
         noise_reduction = 0\n\
         monstercat = 0\n\
         waves = 0\n\
         gravity = 0\n\
         ignore = 0\n",
        max = MAX_LEVEL
    )
}

/// Spawns the analyzer and gives it [`SPAWN_GRACE`] to fail fast. An early
/// exit is reported as [`LedCavaError::SpawnFailure`] with whatever the
/// process wrote to stderr.
fn spawn_analyzer(config_path: &Path) -> Result<Child> {
    let mut child = Command::new(ANALYZER_BIN)
        .arg("-p")
        .arg(config_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| LedCavaError::SpawnFailure(format!("{ANALYZER_BIN}: {e}")))?;

    thread::sleep(SPAWN_GRACE);
    match child.try_wait() {
        Ok(None) => Ok(child),
        Ok(Some(status)) => {
            let mut diag = String::new();
            if let Some(mut stderr) = child.stderr.take() {
                let _ = stderr.read_to_string(&mut diag);
            }
            Err(LedCavaError::SpawnFailure(format!(
                "{ANALYZER_BIN} exited during startup ({status}): {}",
                diag.trim()
            )))
        }
        Err(e) => Err(LedCavaError::SpawnFailure(format!(
            "{ANALYZER_BIN} status unavailable: {e}"
        ))),
    }
}

enum ReadOutcome {
    Accepted(Vec<u8>),
    Malformed,
    Ended,
}

/// Why [`drain_stream`] handed control back to the supervision loop.
enum StreamExit {
    Stopped,
    RestartDue,
}

fn reader_loop(
    shared: Arc<Shared>,
    stdout: ChildStdout,
    bars: usize,
    framerate: u32,
    config_path: &Path,
) {
    let mut reader = BufReader::new(stdout);
    let mut supervisor = Supervisor::new(RESTART_THRESHOLD);
    let mut last_restart = Instant::now();

    loop {
        match drain_stream(&shared, &mut reader, bars, &mut supervisor) {
            StreamExit::Stopped => break,
            StreamExit::RestartDue => {
                tracing::warn!("sustained stream errors from the analyzer");
                if last_restart.elapsed() >= RESTART_BACKOFF {
                    match respawn(&shared, bars, framerate, config_path) {
                        Ok(stdout) => {
                            reader = BufReader::new(stdout);
                            last_restart = Instant::now();
                            tracing::info!("spectrum analyzer restarted");
                        }
                        Err(e) => {
                            if shared.running.load(Ordering::SeqCst) {
                                tracing::error!(error = %e, "analyzer restart failed");
                                thread::sleep(RESTART_BACKOFF);
                            }
                        }
                    }
                } else {
                    tracing::debug!("restart suppressed, still inside backoff window");
                }
            }
        }
    }
}

/// Consumes analyzer output line by line until the source is stopped or the
/// failure streak asks for a restart. Accepted lines replace the snapshot
/// under the data lock; malformed lines and dead-stream reads only feed the
/// supervisor.
fn drain_stream<R: BufRead>(
    shared: &Shared,
    reader: &mut R,
    bars: usize,
    supervisor: &mut Supervisor,
) -> StreamExit {
    let mut line = String::new();
    loop {
        if !shared.running.load(Ordering::SeqCst) {
            return StreamExit::Stopped;
        }
        line.clear();
        let outcome = match reader.read_line(&mut line) {
            Ok(0) => ReadOutcome::Ended,
            Ok(_) => match parse_line(line.trim_end(), bars, MAX_LEVEL) {
                Some(values) => ReadOutcome::Accepted(values),
                None => ReadOutcome::Malformed,
            },
            Err(_) => ReadOutcome::Ended,
        };

        let ended = matches!(outcome, ReadOutcome::Ended);
        match outcome {
            ReadOutcome::Accepted(values) => {
                *shared.lock_levels() = values;
                supervisor.record_success();
            }
            ReadOutcome::Malformed | ReadOutcome::Ended => {
                if ended {
                    thread::sleep(DEAD_STREAM_PAUSE);
                }
                if !shared.running.load(Ordering::SeqCst) {
                    return StreamExit::Stopped;
                }
                if supervisor.record_failure() {
                    return StreamExit::RestartDue;
                }
            }
        }
    }
}

/// Replaces the analyzer process wholesale: the old child is taken out of
/// the slot and reaped, the config artifact is rewritten, and a new child is
/// spawned whose stdout the reader adopts.
fn respawn(shared: &Shared, bars: usize, framerate: u32, config_path: &Path) -> Result<ChildStdout> {
    if let Some(mut child) = shared.take_process() {
        let _ = child.kill();
        let _ = child.wait();
    }
    if !shared.running.load(Ordering::SeqCst) {
        return Err(LedCavaError::SpawnFailure("source is stopping".into()));
    }
    std::fs::write(config_path, render_config(bars, framerate))?;
    let mut child = spawn_analyzer(config_path)?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| LedCavaError::SpawnFailure("analyzer stdout not captured".into()))?;
    shared.store_process(child);
    Ok(stdout)
}

/// Splits an analyzer output line into band levels. Returns `None` unless
/// every token parses and the token count matches the configured band
/// count; accepted values are clamped to `max`.
fn parse_line(line: &str, bars: usize, max: u8) -> Option<Vec<u8>> {
    let mut values = Vec::with_capacity(bars);
    for token in line.split(';').filter(|t| !t.is_empty()) {
        let value: u32 = token.parse().ok()?;
        values.push(value.min(u32::from(max)) as u8);
    }
    (values.len() == bars).then_some(values)
}

/// Tracks consecutive stream failures and decides when a restart is due.
/// The counter resets on the restart decision, so one failure streak fires
/// at most one restart.
struct Supervisor {
    consecutive_errors: u32,
    threshold: u32,
}

impl Supervisor {
    fn new(threshold: u32) -> Self {
        Self {
            consecutive_errors: 0,
            threshold,
        }
    }

    fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Returns true when the failure streak just crossed the threshold.
    fn record_failure(&mut self) -> bool {
        self.consecutive_errors += 1;
        if self.consecutive_errors > self.threshold {
            self.consecutive_errors = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_line() {
        let line = "0;3;8;1;";
        assert_eq!(parse_line(line, 4, 8), Some(vec![0, 3, 8, 1]));
    }

    #[test]
    fn clamps_values_to_the_configured_maximum() {
        assert_eq!(parse_line("12;0;255;8", 4, 8), Some(vec![8, 0, 8, 8]));
    }

    #[test]
    fn rejects_wrong_band_counts() {
        assert_eq!(parse_line("1;2;3", 4, 8), None);
        assert_eq!(parse_line("1;2;3;4;5", 4, 8), None);
        assert_eq!(parse_line("", 4, 8), None);
    }

    #[test]
    fn rejects_non_numeric_tokens() {
        assert_eq!(parse_line("1;x;3;4", 4, 8), None);
        assert_eq!(parse_line("1;-2;3;4", 4, 8), None);
    }

    #[test]
    fn supervisor_fires_once_per_failure_streak() {
        let mut supervisor = Supervisor::new(10);
        for _ in 0..10 {
            assert!(!supervisor.record_failure());
        }
        assert!(supervisor.record_failure(), "11th failure triggers restart");
        // The streak is consumed; the next failure starts a new count.
        assert!(!supervisor.record_failure());
    }

    #[test]
    fn supervisor_resets_on_success() {
        let mut supervisor = Supervisor::new(10);
        for _ in 0..10 {
            supervisor.record_failure();
        }
        supervisor.record_success();
        assert!(!supervisor.record_failure());
    }

    #[test]
    fn rendered_config_carries_the_audio_settings() {
        let config = render_config(16, 60);
        assert!(config.contains("bars = 16"));
        assert!(config.contains("framerate = 60"));
        assert!(config.contains("data_format = ascii"));
        assert!(config.contains("ascii_max_range = 8"));
    }

    fn running_shared(bars: usize) -> Shared {
        Shared {
            levels: Mutex::new(vec![0; bars]),
            running: AtomicBool::new(true),
            process: Mutex::new(None),
        }
    }

    #[test]
    fn accepted_lines_replace_the_snapshot() {
        let shared = running_shared(4);
        let mut supervisor = Supervisor::new(10);
        let mut reader = std::io::Cursor::new(&b"2;0;12;5;\n"[..]);

        // The cursor hits end-of-stream after the one good line, so the
        // failure streak eventually asks for a restart.
        let exit = drain_stream(&shared, &mut reader, 4, &mut supervisor);
        assert!(matches!(exit, StreamExit::RestartDue));
        assert_eq!(*shared.lock_levels(), vec![2, 0, 8, 5]);
    }

    #[test]
    fn malformed_lines_leave_the_snapshot_untouched() {
        let shared = running_shared(4);
        let mut supervisor = Supervisor::new(10);
        let mut reader = std::io::Cursor::new(&b"1;2;3;4;\nx;y;z;w;\n9;9;\n"[..]);

        drain_stream(&shared, &mut reader, 4, &mut supervisor);
        assert_eq!(*shared.lock_levels(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn drain_stops_promptly_once_the_flag_drops() {
        let shared = running_shared(4);
        shared.running.store(false, Ordering::SeqCst);
        let mut supervisor = Supervisor::new(10);
        let mut reader = std::io::Cursor::new(&b"1;2;3;4;\n"[..]);

        let exit = drain_stream(&shared, &mut reader, 4, &mut supervisor);
        assert!(matches!(exit, StreamExit::Stopped));
        assert_eq!(*shared.lock_levels(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn get_data_defaults_to_zeros() {
        let source = AudioSource::new(&AudioConfig {
            bars: 8,
            framerate: 60,
        });
        assert_eq!(source.get_data(), vec![0; 8]);
    }

    #[test]
    fn stop_is_idempotent_and_keeps_the_snapshot() {
        let mut source = AudioSource::new(&AudioConfig {
            bars: 4,
            framerate: 60,
        });
        source.publish(vec![1, 2, 3, 4]);
        source.stop();
        source.stop();
        assert_eq!(source.get_data(), vec![1, 2, 3, 4]);
    }
}
