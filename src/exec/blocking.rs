// src/exec/blocking.rs

//! Blocking mode: the caller's task runs the read loop and gets the whole
//! output back from `execute`.

use std::sync::{Arc, Mutex};

use crate::errors::Result;
use crate::exec::engine::{BoxFuture, Engine, OutputMode, lock};

#[derive(Debug, Default)]
pub struct Blocking {
    buffer: Mutex<String>,
}

impl Blocking {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&self) {
        lock(&self.buffer).clear();
    }

    fn take_output(&self) -> String {
        std::mem::take(&mut *lock(&self.buffer))
    }
}

impl OutputMode for Blocking {
    fn consume_line(&self, line: &str) {
        let mut buffer = lock(&self.buffer);
        buffer.push_str(line);
        buffer.push('\n');
    }

    fn produce_result(
        engine: Arc<Engine<Self>>,
        run: u64,
    ) -> BoxFuture<'static, Result<Option<String>>> {
        Box::pin(async move {
            engine.mode().reset();

            // A read failure only ends the loop; the exit status decides.
            let _ = engine.drain(run).await;

            // Release even when the wait failed so nothing is left running.
            let waited = engine.wait_for().await;
            let released = engine.release(Some(run)).await;
            waited?;
            released?;

            Ok(Some(engine.mode().take_output()))
        })
    }
}
