// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use async_trait::async_trait;
use log_shipper::aggregator::Batch;
use log_shipper::event::LogEvent;
use log_shipper::sink::{Ack, Sink};
use log_shipper::SinkError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Acknowledges every batch and forwards its sequence ids to a channel.
pub struct RecordingSink {
    tx: mpsc::UnboundedSender<Vec<u64>>,
}

impl RecordingSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u64>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn send(&self, batch: &Batch) -> Result<Ack, SinkError> {
        let _ = self.tx.send(ids(batch));
        Ok(Ack {
            accepted: batch.len(),
        })
    }
}

/// Plays back a script of results, then acknowledges everything.
#[derive(Default)]
pub struct ScriptedSink {
    script: Mutex<VecDeque<Result<(), SinkError>>>,
    calls: AtomicUsize,
    delivered: Mutex<Vec<Vec<u64>>>,
}

impl ScriptedSink {
    pub fn new(script: Vec<Result<(), SinkError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        })
    }

    pub fn always(result: Result<(), SinkError>, times: usize) -> Arc<Self> {
        Self::new(vec![result; times])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<Vec<u64>> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for ScriptedSink {
    async fn send(&self, batch: &Batch) -> Result<Ack, SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        next?;
        self.delivered.lock().unwrap().push(ids(batch));
        Ok(Ack {
            accepted: batch.len(),
        })
    }
}

/// Never answers.
pub struct HangingSink;

#[async_trait]
impl Sink for HangingSink {
    async fn send(&self, _batch: &Batch) -> Result<Ack, SinkError> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

/// Never answers its first call, then acknowledges everything.
#[derive(Default)]
pub struct StallOnceSink {
    calls: AtomicUsize,
    delivered: Mutex<Vec<Vec<u64>>>,
}

impl StallOnceSink {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<Vec<u64>> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for StallOnceSink {
    async fn send(&self, batch: &Batch) -> Result<Ack, SinkError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            std::future::pending::<()>().await;
        }
        self.delivered.lock().unwrap().push(ids(batch));
        Ok(Ack {
            accepted: batch.len(),
        })
    }
}

pub fn ids(batch: &Batch) -> Vec<u64> {
    batch.events().iter().map(LogEvent::sequence_id).collect()
}

/// Waits (in paused time) for the next batch.
pub async fn next_batch(rx: &mut mpsc::UnboundedReceiver<Vec<u64>>) -> Option<Vec<u64>> {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Keeps the text of every delivered event.
#[derive(Default)]
pub struct LineSink {
    lines: Mutex<Vec<String>>,
}

impl LineSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for LineSink {
    async fn send(&self, batch: &Batch) -> Result<Ack, SinkError> {
        self.lines.lock().unwrap().extend(
            batch
                .events()
                .iter()
                .map(|event| String::from_utf8_lossy(event.message()).into_owned()),
        );
        Ok(Ack {
            accepted: batch.len(),
        })
    }
}
