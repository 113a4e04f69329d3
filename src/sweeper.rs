use std::{
  sync::Arc,
  thread::{self, JoinHandle},
  time::Duration,
};

use crossbeam::channel::{bounded, select, tick, Receiver, Sender};
use derive_more::Display;
use log::{debug, error};

use crate::{
  db::Barrel,
  errors::{Errors, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum Sweep {
  #[display("rotation")]
  Rotation,

  #[display("compaction")]
  Compaction,

  #[display("sync")]
  Sync,
}

impl Sweep {
  fn run(self, barrel: &Barrel) -> Result<()> {
    match self {
      Sweep::Rotation => barrel.rotate().map(|_| ()),
      Sweep::Compaction => barrel.compact(),
      Sweep::Sync => barrel.sync(),
    }
  }
}

/// Background threads running the periodic sweeps of one engine.
///
/// Each sweep waits on its own ticker and only takes the engine lock while
/// running. Dropping the shutdown sender wakes every thread up for exit.
pub(crate) struct Sweeper {
  shutdown_tx: Option<Sender<()>>,
  handles: Vec<JoinHandle<()>>,
}

impl Sweeper {
  pub(crate) fn start(barrel: Arc<Barrel>) -> Self {
    let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

    let options = &barrel.options;
    let mut sweeps = vec![
      (Sweep::Rotation, options.rotation_interval),
      (Sweep::Compaction, options.compaction_interval),
    ];
    if let Some(sync_interval) = options.sync_interval {
      sweeps.push((Sweep::Sync, sync_interval));
    }

    let handles = sweeps
      .into_iter()
      .filter_map(|(sweep, interval)| {
        spawn_sweep(sweep, interval, barrel.clone(), shutdown_rx.clone())
      })
      .collect();

    Sweeper {
      shutdown_tx: Some(shutdown_tx),
      handles,
    }
  }

  /// Signals every sweep to exit and waits for the ones in flight.
  pub(crate) fn stop(mut self) {
    drop(self.shutdown_tx.take());
    for handle in self.handles.drain(..) {
      if handle.join().is_err() {
        error!("a sweep thread panicked");
      }
    }
  }
}

fn spawn_sweep(
  sweep: Sweep,
  interval: Duration,
  barrel: Arc<Barrel>,
  shutdown_rx: Receiver<()>,
) -> Option<JoinHandle<()>> {
  let res = thread::Builder::new()
    .name(format!("barrel-{}", sweep))
    .spawn(move || {
      let ticker = tick(interval);
      loop {
        select! {
          recv(ticker) -> _ => {
            debug!("running {} sweep", sweep);
            match sweep.run(&barrel) {
              Ok(()) => {}
              Err(Errors::EngineClosed) => break,
              Err(e) => error!("{} sweep failed: {}", sweep, e),
            }
          }
          recv(shutdown_rx) -> _ => break,
        }
      }
      debug!("{} sweep stopped", sweep);
    });

  match res {
    Ok(handle) => Some(handle),
    Err(e) => {
      error!("failed to start the {} sweep: {}", sweep, e);
      None
    }
  }
}
