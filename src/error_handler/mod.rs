// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Background error handling and automatic recovery.
//!
//! Background jobs (flushes, compactions, manifest writes) report their
//! failures to an [`ErrorHandler`]. The handler classifies each error into a
//! [`Severity`], keeps the most severe one as the *background error* and
//! decides whether writes must stop.
//!
//! Retryable I/O errors start an auto-resume thread that redrives the engine
//! through [`ErrorRecovery::resume`] until it succeeds, a non-retryable error
//! shows up or the retry budget runs out. Out-of-space errors are handed to a
//! [`SpaceManager`] instead, which calls back once space is available.

mod severity;

pub use severity::{classify, Severity};

use crate::{
    fs::FileSystem,
    listener::{BackgroundErrorReason, RecoveryInfo},
    statistics::{record_in_histogram, record_tick, Histogram, Ticker},
    Error, ErrorHandlerConfig, IoErrorScope, SubCode,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    thread::JoinHandle,
};

/// Why the engine is asked to flush during recovery
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum FlushReason {
    /// Regular error recovery
    #[default]
    ErrorRecovery,

    /// Retry of a flush that failed without the WAL
    ErrorRecoveryRetryFlush,
}

/// Context handed to [`ErrorRecovery::resume`]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RecoverContext {
    /// Flush reason for the redriven flushes
    pub flush_reason: FlushReason,
}

/// The engine side of error recovery
pub trait ErrorRecovery: Send + Sync {
    /// Redrives the background work that failed.
    ///
    /// Called without any handler lock held. Errors hit by the redriven
    /// jobs are reported through [`ErrorHandler::set_bg_error`] as usual.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the work could not be redriven.
    fn resume(&self, context: &RecoverContext) -> crate::Result<()>;

    /// Stops obsolete file deletion until recovery completes.
    fn disable_file_deletions(&self) {}
}

/// Recovers from out-of-space errors
///
/// Once enough space is available again, the space manager calls
/// [`ErrorHandler::recover_from_bg_error`] with `is_manual == false`.
pub trait SpaceManager: Send + Sync {
    /// Starts watching for free space.
    ///
    /// Called with the handler's state locked; the recovery call back into
    /// the handler has to happen from another thread.
    fn start_error_recovery(&self, handler: &ErrorHandler, error: &Error);

    /// Stops watching; returns `true` if a pending recovery was cancelled.
    fn cancel_error_recovery(&self, handler: &ErrorHandler) -> bool;
}

/// A classified background error
#[derive(Clone, Debug)]
pub struct BackgroundError {
    /// The error as reported (or replaced by a listener)
    pub error: Error,

    /// Its severity
    pub severity: Severity,
}

fn severity_of(error: Option<&BackgroundError>) -> Severity {
    error.map_or(Severity::NoError, |e| e.severity)
}

fn is_space_error(error: &Error) -> bool {
    matches!(error.subcode(), SubCode::NoSpace | SubCode::SpaceLimit)
}

#[derive(Default)]
struct State {
    bg_error: Option<BackgroundError>,

    /// First error seen while a recovery is in progress
    recovery_error: Option<BackgroundError>,

    /// First I/O error seen while a recovery is in progress
    recovery_io_error: Option<Error>,

    recovery_in_prog: bool,
    soft_error_no_bg_work: bool,
    auto_recovery: bool,
    end_recovery: bool,
    recover_context: RecoverContext,
}

impl State {
    fn bg_severity(&self) -> Severity {
        severity_of(self.bg_error.as_ref())
    }

    fn bg_result(&self) -> crate::Result<()> {
        match &self.bg_error {
            Some(bg) => Err(bg.error.clone()),
            None => Ok(()),
        }
    }

    fn check_and_set_recovery_and_bg_error(
        &mut self,
        error: BackgroundError,
        is_db_stopped: &AtomicBool,
    ) {
        if self.recovery_in_prog && self.recovery_error.is_none() {
            self.recovery_error = Some(error.clone());
        }

        if error.severity > self.bg_severity() {
            self.bg_error = Some(error);
        }

        if self.bg_severity() >= Severity::HardError {
            is_db_stopped.store(true, Ordering::Release);
        }
    }
}

/// Tracks background errors and drives recovery from them
///
/// Cheap to clone; all clones share the same state. The auto-resume thread
/// holds a clone while it runs, so call
/// [`ErrorHandler::cancel_error_recovery`] on shutdown.
#[derive(Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct ErrorHandler(Arc<ErrorHandlerInner>);

impl std::ops::Deref for ErrorHandler {
    type Target = ErrorHandlerInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Shared state behind an [`ErrorHandler`]
#[allow(clippy::module_name_repetitions)]
pub struct ErrorHandlerInner {
    config: ErrorHandlerConfig,

    fs: Arc<dyn FileSystem>,

    recovery: Weak<dyn ErrorRecovery>,

    state: Mutex<State>,

    /// Wakes the auto-resume thread early on cancel
    cv: Condvar,

    /// Checked on the write path without taking the state lock
    is_db_stopped: AtomicBool,

    recovery_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ErrorHandler {
    /// Creates an error handler.
    ///
    /// Automatic recovery is enabled if a space manager is configured.
    /// The engine is held weakly; once it is dropped, recovery attempts
    /// fail with [`Error::ShutdownInProgress`].
    #[must_use]
    pub fn new(
        config: ErrorHandlerConfig,
        fs: Arc<dyn FileSystem>,
        recovery: Weak<dyn ErrorRecovery>,
    ) -> Self {
        let state = State {
            auto_recovery: config.space_manager.is_some(),
            ..Default::default()
        };

        Self(Arc::new(ErrorHandlerInner {
            config,
            fs,
            recovery,
            state: Mutex::new(state),
            cv: Condvar::new(),
            is_db_stopped: AtomicBool::new(false),
            recovery_thread: Mutex::new(None),
        }))
    }

    /// Enables automatic recovery of hard and soft errors.
    pub fn enable_auto_recovery(&self) {
        self.state.lock().auto_recovery = true;
    }

    /// Returns `true` if writes must be rejected.
    #[must_use]
    pub fn is_db_stopped(&self) -> bool {
        self.is_db_stopped.load(Ordering::Acquire)
    }

    /// Returns `true` if background work (flushes and compactions) must pause.
    #[must_use]
    pub fn is_bg_work_stopped(&self) -> bool {
        let state = self.state.lock();

        state.bg_error.is_some()
            && (state.bg_severity() >= Severity::HardError
                || !state.auto_recovery
                || state.soft_error_no_bg_work)
    }

    /// Returns `true` if a soft error stopped background work.
    #[must_use]
    pub fn is_soft_error_no_bg_work(&self) -> bool {
        self.state.lock().soft_error_no_bg_work
    }

    /// Returns `true` while a recovery is in progress.
    #[must_use]
    pub fn is_recovery_in_progress(&self) -> bool {
        self.state.lock().recovery_in_prog
    }

    /// Returns the current background error.
    #[must_use]
    pub fn get_bg_error(&self) -> Option<BackgroundError> {
        self.state.lock().bg_error.clone()
    }

    /// Returns the first error seen during the current recovery.
    #[must_use]
    pub fn get_recovery_error(&self) -> Option<BackgroundError> {
        self.state.lock().recovery_error.clone()
    }

    fn stats(&self) -> Option<&Arc<crate::Statistics>> {
        self.config.statistics.as_ref()
    }

    fn resume_engine(&self, context: &RecoverContext) -> crate::Result<()> {
        match self.recovery.upgrade() {
            Some(engine) => engine.resume(context),
            None => Err(Error::ShutdownInProgress),
        }
    }

    fn notify_on_background_error(
        &self,
        reason: BackgroundErrorReason,
        error: &mut Error,
        auto_recovery: &mut bool,
    ) {
        for listener in &self.config.listeners {
            listener.on_background_error(reason, error);

            if *auto_recovery {
                listener.on_error_recovery_begin(reason, error, auto_recovery);
            }
        }
    }

    fn notify_on_error_recovery_end(
        &self,
        old_bg_error: Option<Error>,
        new_bg_error: crate::Result<()>,
    ) {
        let info = RecoveryInfo {
            old_bg_error,
            new_bg_error,
        };

        for listener in &self.config.listeners {
            listener.on_error_recovery_end(&info);
        }
    }

    /// Reports a background error.
    ///
    /// Retryable I/O errors and file-scoped I/O errors start the auto-resume
    /// thread, unless they come from a compaction, which is simply
    /// rescheduled. Everything else goes through the severity tables.
    ///
    /// # Errors
    ///
    /// Returns the background error in effect afterwards.
    pub fn set_bg_error(&self, error: Error, reason: BackgroundErrorReason) -> crate::Result<()> {
        log::warn!("Background {reason} error: {error}");

        if matches!(
            reason,
            BackgroundErrorReason::ManifestWrite | BackgroundErrorReason::ManifestWriteNoWal
        ) {
            log::info!("Disabling file deletions after manifest write error");

            if let Some(engine) = self.recovery.upgrade() {
                engine.disable_file_deletions();
            }
        }

        let mut state = self.state.lock();

        let Some(io) = error.as_io().cloned() else {
            return self.handle_known_errors(&mut state, error, reason);
        };

        if state.recovery_in_prog && state.recovery_io_error.is_none() {
            state.recovery_io_error = Some(error.clone());
        }

        if io.data_loss && io.scope != IoErrorScope::File {
            let mut error = error;
            let mut auto_recovery = false;
            MutexGuard::unlocked(&mut state, || {
                self.notify_on_background_error(reason, &mut error, &mut auto_recovery);
            });

            state.check_and_set_recovery_and_bg_error(
                BackgroundError {
                    error,
                    severity: Severity::UnrecoverableError,
                },
                &self.is_db_stopped,
            );

            record_tick(self.stats(), Ticker::ErrorHandlerBgErrorCount, 1);
            record_tick(self.stats(), Ticker::ErrorHandlerBgIoErrorCount, 1);

            log::error!("Background I/O error lost data, stopping writes");

            state.recover_context = RecoverContext::default();
            return state.bg_result();
        }

        if io.subcode != SubCode::NoSpace && (io.scope == IoErrorScope::File || io.retryable) {
            let mut error = error;
            let mut auto_recovery = false;
            MutexGuard::unlocked(&mut state, || {
                self.notify_on_background_error(reason, &mut error, &mut auto_recovery);
            });

            record_tick(self.stats(), Ticker::ErrorHandlerBgErrorCount, 1);
            record_tick(self.stats(), Ticker::ErrorHandlerBgIoErrorCount, 1);
            record_tick(self.stats(), Ticker::ErrorHandlerBgRetryableIoErrorCount, 1);

            match reason {
                BackgroundErrorReason::Compaction => {
                    // The compaction is rescheduled, nothing to recover
                    record_tick(self.stats(), Ticker::ErrorHandlerAutoresumeCount, 1);
                    log::info!("Retryable compaction error, compaction will be rescheduled");
                    return state.bg_result();
                }
                BackgroundErrorReason::FlushNoWal | BackgroundErrorReason::ManifestWriteNoWal => {
                    state.check_and_set_recovery_and_bg_error(
                        BackgroundError {
                            error,
                            severity: Severity::SoftError,
                        },
                        &self.is_db_stopped,
                    );
                    state.soft_error_no_bg_work = true;
                    state.recover_context = RecoverContext {
                        flush_reason: FlushReason::ErrorRecoveryRetryFlush,
                    };
                }
                _ => {
                    state.check_and_set_recovery_and_bg_error(
                        BackgroundError {
                            error,
                            severity: Severity::HardError,
                        },
                        &self.is_db_stopped,
                    );
                    state.recover_context = RecoverContext::default();
                }
            }

            return self.start_recover_from_retryable(state);
        }

        record_tick(self.stats(), Ticker::ErrorHandlerBgIoErrorCount, 1);
        self.handle_known_errors(&mut state, error, reason)
    }

    fn handle_known_errors(
        &self,
        state: &mut MutexGuard<'_, State>,
        error: Error,
        reason: BackgroundErrorReason,
    ) -> crate::Result<()> {
        record_tick(self.stats(), Ticker::ErrorHandlerBgErrorCount, 1);

        let severity = classify(
            reason,
            error.code(),
            error.subcode(),
            self.config.paranoid_checks,
        );

        let mut new_bg_error = BackgroundError { error, severity };

        let mut auto_recovery = state.auto_recovery && severity < Severity::FatalError;

        if is_space_error(&new_bg_error.error) {
            self.override_no_space_error(&mut new_bg_error, &mut auto_recovery);
        }

        MutexGuard::unlocked(state, || {
            self.notify_on_background_error(reason, &mut new_bg_error.error, &mut auto_recovery);
        });

        // Listeners run unlocked, so the state may have moved on meanwhile
        if state.recovery_in_prog && state.recovery_error.is_none() {
            state.recovery_error = Some(new_bg_error.clone());
        }

        if new_bg_error.severity <= state.bg_severity() {
            log::debug!(
                "Ignoring {} ({}), current background error is at least as severe",
                new_bg_error.error,
                new_bg_error.severity,
            );
            return state.bg_result();
        }

        log::error!(
            "Setting background error ({}): {}",
            new_bg_error.severity,
            new_bg_error.error
        );

        let is_space = is_space_error(&new_bg_error.error);
        state.bg_error = Some(new_bg_error);
        state.recover_context = RecoverContext::default();

        if state.bg_severity() >= Severity::HardError {
            self.is_db_stopped.store(true, Ordering::Release);
        }

        if auto_recovery {
            state.recovery_in_prog = true;

            let error = state.bg_error.as_ref().map(|bg| bg.error.clone());

            if let (true, Some(manager), Some(error)) =
                (is_space, &self.config.space_manager, error)
            {
                MutexGuard::unlocked(state, || manager.start_error_recovery(self, &error));
            }
        }

        state.bg_result()
    }

    fn override_no_space_error(&self, error: &mut BackgroundError, auto_recovery: &mut bool) {
        if error.severity >= Severity::FatalError {
            return;
        }

        if self.config.space_manager.is_none() {
            *auto_recovery = false;
            return;
        }

        if self.config.allow_2pc && error.severity <= Severity::SoftError {
            // Prepared transactions may already be persisted in the WAL
            *auto_recovery = false;
            error.severity = Severity::FatalError;
            return;
        }

        if let Err(Error::NotSupported(_)) = self.fs.free_space(&self.config.db_path) {
            log::warn!("Free space cannot be queried, disabling automatic recovery");
            *auto_recovery = false;
        }
    }

    fn start_recover_from_retryable(&self, mut state: MutexGuard<'_, State>) -> crate::Result<()> {
        if state.bg_error.is_none() {
            return Ok(());
        }

        if self.config.max_bgerror_resume_count <= 0 || state.recovery_in_prog {
            return state.bg_result();
        }

        record_tick(self.stats(), Ticker::ErrorHandlerAutoresumeCount, 1);
        log::info!("Starting automatic recovery from retryable background error");

        let previous = self.recovery_thread.lock().take();
        if let Some(handle) = previous {
            if handle.thread().id() != std::thread::current().id() {
                MutexGuard::unlocked(&mut state, || {
                    if handle.join().is_err() {
                        log::error!("Previous recovery thread panicked");
                    }
                });
            }
        }

        if state.recovery_in_prog {
            return state.bg_result();
        }

        state.recovery_in_prog = true;

        let handler = self.clone();
        let spawned = std::thread::Builder::new()
            .name("bg-error-resume".into())
            .spawn(move || handler.recover_from_retryable_bg_io_error());

        match spawned {
            Ok(handle) => {
                *self.recovery_thread.lock() = Some(handle);
            }
            Err(e) => {
                log::error!("Failed to spawn recovery thread: {e}");
                state.recovery_in_prog = false;
            }
        }

        state.bg_result()
    }

    /// Body of the auto-resume thread
    fn recover_from_retryable_bg_io_error(&self) {
        let mut state = self.state.lock();

        let context = state.recover_context;
        let interval = self.config.bgerror_resume_retry_interval;
        let mut resume_count = self.config.max_bgerror_resume_count;
        let mut retry_count = 0_u64;

        while resume_count > 0 {
            if state.end_recovery {
                state.recovery_in_prog = false;
                let old = state.bg_error.as_ref().map(|bg| bg.error.clone());
                drop(state);

                log::info!("Automatic recovery cancelled");
                self.notify_on_error_recovery_end(old, Err(Error::ShutdownInProgress));
                return;
            }

            state.recovery_io_error = None;
            state.recovery_error = None;
            retry_count += 1;

            log::info!("Automatic recovery attempt {retry_count}");
            let result = MutexGuard::unlocked(&mut state, || self.resume_engine(&context));

            record_tick(self.stats(), Ticker::ErrorHandlerAutoresumeRetryTotalCount, 1);

            if matches!(result, Err(Error::ShutdownInProgress))
                || state.bg_severity() >= Severity::FatalError
            {
                state.recovery_in_prog = false;
                record_in_histogram(
                    self.stats(),
                    Histogram::ErrorHandlerAutoresumeRetryCount,
                    retry_count,
                );

                let old = state.bg_error.as_ref().map(|bg| bg.error.clone());
                let new = match result {
                    Err(Error::ShutdownInProgress) => Err(Error::ShutdownInProgress),
                    _ => state.bg_result(),
                };
                drop(state);

                log::warn!("Automatic recovery stopped");
                self.notify_on_error_recovery_end(old, new);
                return;
            }

            let retry_io_error = state
                .recovery_io_error
                .as_ref()
                .is_some_and(Error::is_retryable)
                && severity_of(state.recovery_error.as_ref()) <= Severity::HardError;

            if retry_io_error {
                if !state.end_recovery {
                    log::debug!("Retryable error during recovery, waiting {interval:?}");
                    let _ = self.cv.wait_for(&mut state, interval);
                }
            } else if state.recovery_io_error.is_none()
                && state.recovery_error.is_none()
                && result.is_ok()
            {
                let old = state.bg_error.take().map(|bg| bg.error);
                self.is_db_stopped.store(false, Ordering::Release);
                state.recovery_in_prog = false;
                state.soft_error_no_bg_work = false;
                drop(state);

                record_tick(self.stats(), Ticker::ErrorHandlerAutoresumeSuccessCount, 1);
                record_in_histogram(
                    self.stats(),
                    Histogram::ErrorHandlerAutoresumeRetryCount,
                    retry_count,
                );

                log::info!("Automatic recovery succeeded after {retry_count} attempt(s)");
                self.notify_on_error_recovery_end(old, Ok(()));
                return;
            } else {
                state.recovery_in_prog = false;
                record_in_histogram(
                    self.stats(),
                    Histogram::ErrorHandlerAutoresumeRetryCount,
                    retry_count,
                );

                let old = state.bg_error.as_ref().map(|bg| bg.error.clone());
                let new = match (&state.recovery_io_error, &state.recovery_error, result) {
                    (Some(io), _, _) => Err(io.clone()),
                    (None, Some(bg), _) => Err(bg.error.clone()),
                    (None, None, result) => result,
                };
                drop(state);

                log::warn!("Automatic recovery failed with non-retryable error");
                self.notify_on_error_recovery_end(old, new);
                return;
            }

            resume_count -= 1;
        }

        state.recovery_in_prog = false;
        let old = state.bg_error.as_ref().map(|bg| bg.error.clone());
        drop(state);

        record_in_histogram(
            self.stats(),
            Histogram::ErrorHandlerAutoresumeRetryCount,
            retry_count,
        );

        log::warn!("Automatic recovery gave up after {retry_count} attempt(s)");
        self.notify_on_error_recovery_end(
            old,
            Err(Error::Aborted("Exceeded resume retry count".into())),
        );
    }

    /// Manually recovers from the current background error.
    ///
    /// # Errors
    ///
    /// Will return `Err` if recovery failed, is already in progress
    /// ([`Error::Busy`]), or the background error is not recoverable.
    pub fn resume(&self) -> crate::Result<()> {
        self.recover_from_bg_error(true)
    }

    /// Attempts to recover from the current background error.
    ///
    /// Soft errors are cleared without redriving the engine.
    ///
    /// # Errors
    ///
    /// Will return `Err` if recovery failed, is already in progress
    /// ([`Error::Busy`]), or the background error is not recoverable.
    pub fn recover_from_bg_error(&self, is_manual: bool) -> crate::Result<()> {
        let mut state = self.state.lock();

        if state.bg_error.is_none() {
            return Ok(());
        }

        if state.bg_severity() >= Severity::FatalError {
            log::error!("Cannot recover from {} error", state.bg_severity());
            return state.bg_result();
        }

        let no_bg_work_original = state.soft_error_no_bg_work;

        if is_manual {
            if state.recovery_in_prog {
                return Err(Error::Busy);
            }

            state.recovery_in_prog = true;
            state.soft_error_no_bg_work = false;
            state.recover_context = RecoverContext {
                flush_reason: if no_bg_work_original {
                    FlushReason::ErrorRecoveryRetryFlush
                } else {
                    FlushReason::ErrorRecovery
                },
            };
        }

        if state.bg_severity() == Severity::SoftError
            && state.recover_context.flush_reason == FlushReason::ErrorRecovery
        {
            // Nothing to redrive, background work has kept running
            state.recovery_error = None;
            return self.clear_bg_error_locked(&mut state);
        }

        state.recovery_error = None;
        let context = state.recover_context;
        let result = MutexGuard::unlocked(&mut state, || self.resume_engine(&context));

        let result = match result {
            Ok(()) => {
                state.soft_error_no_bg_work = false;
                self.clear_bg_error_locked(&mut state)
            }
            Err(e) => {
                state.soft_error_no_bg_work = no_bg_work_original;
                Err(e)
            }
        };

        if is_manual
            || matches!(result, Err(Error::ShutdownInProgress))
            || state.bg_severity() >= Severity::FatalError
        {
            state.recovery_in_prog = false;
        }

        result
    }

    /// Clears the background error if recovery hit no new error.
    ///
    /// # Errors
    ///
    /// Returns the error seen during recovery, if any.
    pub fn clear_bg_error(&self) -> crate::Result<()> {
        let mut state = self.state.lock();
        self.clear_bg_error_locked(&mut state)
    }

    fn clear_bg_error_locked(&self, state: &mut MutexGuard<'_, State>) -> crate::Result<()> {
        if let Some(recovery_error) = &state.recovery_error {
            return Err(recovery_error.error.clone());
        }

        let old = state.bg_error.take().map(|bg| bg.error);
        state.recovery_io_error = None;
        state.recovery_in_prog = false;
        state.soft_error_no_bg_work = false;
        self.is_db_stopped.store(false, Ordering::Release);

        log::info!("Background error cleared");
        MutexGuard::unlocked(state, || self.notify_on_error_recovery_end(old, Ok(())));

        Ok(())
    }

    /// Stops any recovery in progress and disables automatic recovery.
    ///
    /// Blocks until the auto-resume thread has exited. Safe to call while
    /// shutting down.
    pub fn cancel_error_recovery(&self) {
        self.state.lock().auto_recovery = false;

        if let Some(manager) = &self.config.space_manager {
            if manager.cancel_error_recovery(self) {
                self.state.lock().recovery_in_prog = false;
            }
        }

        self.end_auto_recovery();
    }

    fn end_auto_recovery(&self) {
        {
            let mut state = self.state.lock();
            state.end_recovery = true;
            self.cv.notify_all();
        }

        let handle = self.recovery_thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                log::error!("Recovery thread panicked");
            }
        }
    }
}
