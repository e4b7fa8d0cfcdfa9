//! The asynchronous ripper.
//!
//! A `Ripper` owns one worker thread for its whole lifetime.  Indexing
//! jobs are queued over a channel, run one at a time, and report back
//! exclusively through the installed [`Callback`]: whatever happens to
//! a job, the caller sees exactly one `on_finished` per successful call
//! to [`Ripper::index`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use anyhow::{anyhow, Context};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{info, trace, warn};

use crate::cc::{ClosedCaptionSink, NullCcSink};
use crate::css::{CssDecrypter, NullDecrypter};
use crate::errors::RipError;
use crate::ifo::Ifo;
use crate::params::ParamFile;
use crate::rip::{self, AbortFlags, RipOutput, RipperConfig, ScanEnd, ScanObserver};
use crate::vob::{VobFileSet, VobSource};
use crate::Result;

/// The sink for everything a running job has to say.  Installed with
/// [`Ripper::set_callback`] and invoked from the worker thread.
pub trait Callback: Send {
    /// A human-readable status or error message.
    fn on_message(&mut self, _text: &str) {}

    /// Scan progress in the range `0.0..=1.0`.
    fn on_progress(&mut self, _fraction: f64) {}

    /// The job ended.  Emitted exactly once per job, also on abort and
    /// failure.
    fn on_finished(&mut self, _succeeded: bool) {}
}

enum Command {
    Index,
    Exit,
}

/// Everything the worker thread reads while a job runs.  The lock is
/// held for the whole scan, which is also what keeps mutators out
/// while a job is running.
struct State {
    ifo: Option<Ifo>,
    source: Option<Box<dyn VobSource>>,
    css: Box<dyn CssDecrypter>,
    cc: Box<dyn ClosedCaptionSink>,
    config: RipperConfig,
    chunk_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
    output: Option<RipOutput>,
}

struct Shared {
    state: Mutex<State>,
    /// The callback has its own lock: the worker reads it while the
    /// caller thread may be replacing it.
    callback: Mutex<Option<Box<dyn Callback>>>,
    abort: AbortFlags,
    indexing: AtomicBool,
}

/// Recover the guard even if a previous holder panicked; the state
/// itself stays consistent because jobs park their results last.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Rips DVD subtitle streams asynchronously.
pub struct Ripper {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Ripper {
    /// Create a ripper and spawn its worker thread.
    pub fn new() -> Ripper {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                ifo: None,
                source: None,
                css: Box::new(NullDecrypter),
                cc: Box::new(NullCcSink),
                config: RipperConfig::default(),
                chunk_path: None,
                output_path: None,
                output: None,
            }),
            callback: Mutex::new(None),
            abort: AbortFlags::default(),
            indexing: AtomicBool::new(false),
        });
        let (commands, receiver) = bounded(1);
        let worker_shared = shared.clone();
        let worker = thread::spawn(move || worker_loop(worker_shared, receiver));
        Ripper {
            shared,
            commands,
            worker: Some(worker),
        }
    }

    /// Load the `VTS_xx_0.IFO` to rip, along with its VOB set.  The
    /// chunk cache will live next to it.
    pub fn set_input<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if self.is_indexing() {
            return Err(RipError::Busy.into());
        }
        let path = path.as_ref();
        let ifo = Ifo::open(path)?;
        let source = VobFileSet::open(path)?;
        let mut state = lock(&self.shared.state);
        state.chunk_path = Some(path.with_extension("chunks"));
        state.ifo = Some(ifo);
        state.source = Some(Box::new(source));
        state.output = None;
        Ok(())
    }

    /// Set where the caller intends to write the results.  The ripper
    /// itself never writes there; see [`Ripper::take_output`].
    pub fn set_output<P: AsRef<Path>>(&self, path: P) {
        lock(&self.shared.state).output_path = Some(path.as_ref().to_owned());
    }

    /// Replace the rip configuration.  Fails while a job is running or
    /// when the configuration does not match the loaded IFO.
    pub fn set_config(&self, config: RipperConfig) -> Result<()> {
        if self.is_indexing() {
            return Err(RipError::Busy.into());
        }
        let mut state = lock(&self.shared.state);
        if let Some(ifo) = &state.ifo {
            rip::selected_cells(ifo, &config)?;
        }
        state.config = config;
        Ok(())
    }

    /// Install a CSS decrypter, replacing the default one that never
    /// finds a key.
    pub fn set_decrypter(&self, css: Box<dyn CssDecrypter>) -> Result<()> {
        if self.is_indexing() {
            return Err(RipError::Busy.into());
        }
        lock(&self.shared.state).css = css;
        Ok(())
    }

    /// Install a closed-caption sink, replacing the default one that
    /// discards everything.
    pub fn set_cc_sink(&self, cc: Box<dyn ClosedCaptionSink>) -> Result<()> {
        if self.is_indexing() {
            return Err(RipError::Busy.into());
        }
        lock(&self.shared.state).cc = cc;
        Ok(())
    }

    /// Install the callback sink.  May be called at any time, even
    /// while a job is running.
    pub fn set_callback(&self, callback: Box<dyn Callback>) {
        *lock(&self.shared.callback) = Some(callback);
    }

    /// Load a parameter file and configure everything from it: input,
    /// output, PGC, angle, cells, languages and options.  Relative
    /// paths are resolved against the parameter file's directory.
    pub fn load_params<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        let params = ParamFile::parse(&text)
            .with_context(|| format!("could not load {}", path.display()))?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        self.set_input(dir.join(&params.input))?;
        self.set_output(dir.join(&params.output));

        let config = {
            let state = lock(&self.shared.state);
            let ifo = state
                .ifo
                .as_ref()
                .ok_or_else(|| anyhow!("no input loaded"))?;
            if params.pgc == 0 || params.pgc > ifo.pgcs.len() {
                return Err(RipError::Config(format!(
                    "PGC {} is out of range 1-{}",
                    params.pgc,
                    ifo.pgcs.len()
                ))
                .into());
            }
            params.to_config(&ifo.pgcs[params.pgc - 1].lang_ids)?
        };
        self.set_config(config)
    }

    /// Queue an indexing job.  Fails with [`RipError::Busy`] while one
    /// is already running, and synchronously for configuration errors;
    /// everything after that arrives through the callback.
    pub fn index(&self) -> Result<()> {
        if self
            .shared
            .indexing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RipError::Busy.into());
        }

        // Catch configuration mistakes before the job starts.
        let checked = {
            let state = lock(&self.shared.state);
            match &state.ifo {
                None => Err(RipError::Config("no input loaded".to_string()).into()),
                Some(ifo) => rip::selected_cells(ifo, &state.config).map(|_| ()),
            }
        };
        if let Err(err) = checked {
            self.shared.indexing.store(false, Ordering::SeqCst);
            return Err(err);
        }

        self.shared.abort.abort.store(false, Ordering::SeqCst);
        self.shared.abort.save_partial.store(false, Ordering::SeqCst);
        if self.commands.send(Command::Index).is_err() {
            self.shared.indexing.store(false, Ordering::SeqCst);
            return Err(anyhow!("the worker thread is gone"));
        }
        Ok(())
    }

    /// Is a job currently running?
    pub fn is_indexing(&self) -> bool {
        self.shared.indexing.load(Ordering::SeqCst)
    }

    /// Ask the running job to stop at the next sector.  With
    /// `save_partial`, whatever was extracted so far is still parked
    /// for [`Ripper::take_output`]; the chunk cache is never written
    /// for an aborted scan.
    pub fn abort(&self, save_partial: bool) {
        self.shared
            .abort
            .save_partial
            .store(save_partial, Ordering::SeqCst);
        self.shared.abort.abort.store(true, Ordering::SeqCst);
    }

    /// Take the output of the last finished job, if any.
    pub fn take_output(&self) -> Option<RipOutput> {
        lock(&self.shared.state).output.take()
    }

    /// The output path configured by the caller or the parameter file.
    pub fn output_path(&self) -> Option<PathBuf> {
        lock(&self.shared.state).output_path.clone()
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> RipperConfig {
        lock(&self.shared.state).config.clone()
    }
}

impl Default for Ripper {
    fn default() -> Ripper {
        Ripper::new()
    }
}

impl Drop for Ripper {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Exit);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Forwards scan messages and progress to the installed callback.
struct CallbackObserver<'a> {
    callback: &'a Mutex<Option<Box<dyn Callback>>>,
}

impl ScanObserver for CallbackObserver<'_> {
    fn message(&mut self, text: &str) {
        info!("{}", text);
        if let Some(callback) = lock(self.callback).as_mut() {
            callback.on_message(text);
        }
    }

    fn progress(&mut self, fraction: f64) {
        trace!("progress: {:.1}%", fraction * 100.0);
        if let Some(callback) = lock(self.callback).as_mut() {
            callback.on_progress(fraction);
        }
    }
}

fn worker_loop(shared: Arc<Shared>, commands: Receiver<Command>) {
    while let Ok(command) = commands.recv() {
        match command {
            Command::Exit => break,
            Command::Index => {
                let succeeded = run_job(&shared);
                shared.abort.abort.store(false, Ordering::SeqCst);
                shared.abort.save_partial.store(false, Ordering::SeqCst);
                shared.indexing.store(false, Ordering::SeqCst);
                if let Some(callback) = lock(&shared.callback).as_mut() {
                    callback.on_finished(succeeded);
                }
            }
        }
    }
    trace!("worker thread exiting");
}

fn run_job(shared: &Shared) -> bool {
    let mut observer = CallbackObserver {
        callback: &shared.callback,
    };
    let mut state = lock(&shared.state);
    let state = &mut *state;
    let (ifo, source) = match (&state.ifo, &mut state.source) {
        (Some(ifo), Some(source)) => (ifo, source),
        _ => {
            observer.message("Error: no input loaded.");
            return false;
        }
    };

    let result = rip::create(
        ifo,
        source.as_mut(),
        state.css.as_mut(),
        state.cc.as_mut(),
        &state.config,
        state.chunk_path.as_deref(),
        &shared.abort,
        &mut observer,
    );
    match result {
        Ok(ScanEnd::Completed(output)) => {
            observer.message("Done.");
            state.output = Some(output);
            true
        }
        Ok(ScanEnd::Aborted(output)) => {
            state.output = output;
            false
        }
        Err(err) => {
            warn!("indexing job failed: {:#}", err);
            observer.message(&format!("Error: {:#}", err));
            false
        }
    }
}
