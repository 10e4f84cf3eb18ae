//! Start/stop notifications for code embedding the server

type Callback = Box<dyn Fn() + Send + Sync>;

/// A pair of callbacks run when the server starts accepting connections and
/// when it stops.
///
/// Listeners are invoked synchronously, in registration order, on the thread
/// running the accept loop.
pub struct StatusListener {
    started: Callback,
    stopped: Callback,
}

impl StatusListener {
    pub fn new<S, T>(started: S, stopped: T) -> Self
    where
        S: Fn() + Send + Sync + 'static,
        T: Fn() + Send + Sync + 'static,
    {
        Self {
            started: Box::new(started),
            stopped: Box::new(stopped),
        }
    }

    pub(crate) fn started(&self) {
        (self.started)()
    }

    pub(crate) fn stopped(&self) {
        (self.stopped)()
    }
}

impl std::fmt::Debug for StatusListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusListener").finish_non_exhaustive()
    }
}
