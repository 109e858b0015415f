use std::sync::{Arc, Condvar, Mutex};

pub trait Ctx where {
    fn cancel(&mut self);
    fn wait(&self);
    fn is_cancelled(&self) -> bool;
}

pub struct ContextDefault {
    cancelled: Arc<(Mutex<bool>, Condvar)>,
    parent: Option<Arc<ContextDefault>>,
}

impl Clone for ContextDefault {
    fn clone(&self) -> Self {
        let parent = match &self.parent {
            None => None,
            Some(x) => Some(x.clone())
        };
        Self { cancelled: Arc::clone(&self.cancelled), parent }
    }
}

impl ContextDefault {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new((Mutex::new(false), Condvar::new())),
            parent: None,
        }
    }
}

impl Ctx for ContextDefault {
    fn cancel(&mut self) {
        let (cancelled, cvar) = &*self.cancelled;
        let mut cancelled = cancelled.lock().unwrap();
        *cancelled = true;
        // We notify the condvar that the value has changed.
        cvar.notify_all();
    }

    fn wait(&self) {
        // Wait for the thread to start up.
        let (lock, cvar) = &*self.cancelled;
        let mut cancelled = lock.lock().unwrap();
        while !*cancelled {
            cancelled = cvar.wait(cancelled).unwrap();
        }
    }

    fn is_cancelled(&self) -> bool {
        let (cancelled, _) = &*self.cancelled;
        *cancelled.lock().unwrap()
    }
}
