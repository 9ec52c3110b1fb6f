// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./pipeline_test.rs"]
mod tests;

use crate::conditions::{AlwaysUpload, ConditionOracle};
use crate::config::PipelineConfig;
use crate::scheduler::{SchedulerHandle, UploadScheduler};
use crate::stats::UploadStats;
use crate::uploader::Uploader;
use bd_batch::{
  BatchStore,
  BatchWriter,
  Diagnostics,
  LogDiagnostics,
  PayloadFormat,
  ShutdownTrigger,
  StoreStats,
  SystemTimeProvider,
  TimeProvider,
};
use prometheus::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

//
// Feature
//

/// The independent data streams that each get their own store directory and upload worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
  Logs,
  Traces,
  Crashes,
}

impl Feature {
  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Logs => "logs",
      Self::Traces => "traces",
      Self::Crashes => "crashes",
    }
  }

  #[must_use]
  pub const fn directory_name(self) -> &'static str {
    self.as_str()
  }

  #[must_use]
  pub const fn content_type(self) -> &'static str {
    match self {
      Self::Logs | Self::Crashes => "application/json",
      Self::Traces => "text/plain;charset=UTF-8",
    }
  }

  #[must_use]
  pub const fn payload_format(self) -> PayloadFormat {
    match self {
      Self::Logs | Self::Crashes => PayloadFormat::json_array(),
      Self::Traces => PayloadFormat::newline_delimited(),
    }
  }
}

//
// PipelineContext
//

/// Everything a feature pipeline needs from its host. Built once at initialization and handed to
/// every [`FeaturePipeline::start`].
#[derive(Clone)]
pub struct PipelineContext {
  pub root_directory: PathBuf,
  pub config: PipelineConfig,
  pub uploader: Arc<dyn Uploader>,
  pub conditions: Arc<dyn ConditionOracle>,
  pub time_provider: Arc<dyn TimeProvider>,
  pub diagnostics: Arc<dyn Diagnostics>,
  pub registry: Registry,
}

impl PipelineContext {
  /// A context with default configuration, the system clock, no upload conditions and
  /// diagnostics going to the log.
  pub fn new(root_directory: impl Into<PathBuf>, uploader: Arc<dyn Uploader>) -> Self {
    Self {
      root_directory: root_directory.into(),
      config: PipelineConfig::default(),
      uploader,
      conditions: Arc::new(AlwaysUpload),
      time_provider: Arc::new(SystemTimeProvider),
      diagnostics: Arc::new(LogDiagnostics::new("batch")),
      registry: Registry::new(),
    }
  }
}

//
// FeaturePipeline
//

/// A running store of a single feature with its writer task and upload worker.
pub struct FeaturePipeline {
  feature: Feature,
  store: Arc<BatchStore>,
  writer: BatchWriter,
  scheduler: SchedulerHandle,
  upload_stats: UploadStats,
  registry: Registry,
  shutdown: ShutdownTrigger,
  writer_task: JoinHandle<()>,
  scheduler_task: JoinHandle<()>,
}

impl FeaturePipeline {
  /// Opens the feature's store under the context's root directory and spawns its workers. Must be
  /// called from within a tokio runtime.
  pub fn start(feature: Feature, context: &PipelineContext) -> crate::Result<Self> {
    context.config.validate()?;

    let store_stats = StoreStats::new(&context.registry, feature.as_str())?;
    let upload_stats = match UploadStats::new(&context.registry, feature.as_str()) {
      Ok(stats) => stats,
      Err(e) => {
        store_stats.unregister(&context.registry);
        return Err(e.into());
      },
    };

    let store = match BatchStore::open(
      context.root_directory.join(feature.directory_name()),
      context.config.store.clone(),
      context.time_provider.clone(),
      store_stats.clone(),
      context.diagnostics.clone(),
    ) {
      Ok(store) => Arc::new(store),
      Err(e) => {
        store_stats.unregister(&context.registry);
        upload_stats.unregister(&context.registry);
        return Err(e.into());
      },
    };

    let shutdown = ShutdownTrigger::default();
    let (writer, writer_task) = bd_batch::writer::new(store.clone());
    let writer_task = tokio::spawn(writer_task.run(shutdown.make_shutdown()));

    let (scheduler, scheduler_handle) = UploadScheduler::new(
      store.clone(),
      feature.payload_format(),
      feature.content_type(),
      context.uploader.clone(),
      context.conditions.clone(),
      context.config.upload.clone(),
      upload_stats.clone(),
    );
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.make_shutdown()));

    log::info!(
      "started {} pipeline in {}",
      feature.as_str(),
      store.directory().display()
    );

    Ok(Self {
      feature,
      store,
      writer,
      scheduler: scheduler_handle,
      upload_stats,
      registry: context.registry.clone(),
      shutdown,
      writer_task,
      scheduler_task,
    })
  }

  #[must_use]
  pub const fn feature(&self) -> Feature {
    self.feature
  }

  #[must_use]
  pub const fn store(&self) -> &Arc<BatchStore> {
    &self.store
  }

  pub fn write(&self, record: Vec<u8>) {
    self.writer.write(record);
  }

  pub fn flush(&self) {
    self.writer.flush();
  }

  /// Flushes and waits until the OPEN batch has been closed.
  pub async fn flush_and_wait(&self) {
    self.writer.flush_and_wait().await;
  }

  pub fn upload_now(&self) {
    self.scheduler.upload_now();
  }

  /// Signals shutdown and waits for both workers. Queued writes are appended first and an upload
  /// attempt that is in progress completes. The store directory lock is released once this
  /// returns.
  pub async fn stop(self) {
    let Self {
      feature,
      store,
      writer,
      upload_stats,
      registry,
      shutdown,
      writer_task,
      scheduler_task,
      ..
    } = self;

    shutdown.cancel();
    for (name, task) in [("writer", writer_task), ("scheduler", scheduler_task)] {
      if let Err(e) = task.await {
        log::warn!("{} {name} task failed: {e}", feature.as_str());
      }
    }
    shutdown.shutdown().await;

    store.stats().unregister(&registry);
    upload_stats.unregister(&registry);
    drop(writer);
    drop(store);
    log::info!("stopped {} pipeline", feature.as_str());
  }
}

//
// FeatureHandle
//

/// Host facing handle of a feature. Before initialization (or after stop) every call is a no-op
/// and written records are discarded.
#[derive(Default)]
pub enum FeatureHandle {
  #[default]
  Uninitialized,
  Running(FeaturePipeline),
}

impl FeatureHandle {
  pub fn start(feature: Feature, context: &PipelineContext) -> crate::Result<Self> {
    Ok(Self::Running(FeaturePipeline::start(feature, context)?))
  }

  #[must_use]
  pub const fn is_running(&self) -> bool {
    matches!(self, Self::Running(_))
  }

  #[must_use]
  pub const fn pipeline(&self) -> Option<&FeaturePipeline> {
    match self {
      Self::Running(pipeline) => Some(pipeline),
      Self::Uninitialized => None,
    }
  }

  pub fn write(&self, record: Vec<u8>) {
    match self {
      Self::Running(pipeline) => pipeline.write(record),
      Self::Uninitialized => log::trace!("discarding record written before initialization"),
    }
  }

  pub fn flush(&self) {
    if let Self::Running(pipeline) = self {
      pipeline.flush();
    }
  }

  pub async fn flush_and_wait(&self) {
    if let Self::Running(pipeline) = self {
      pipeline.flush_and_wait().await;
    }
  }

  pub fn upload_now(&self) {
    if let Self::Running(pipeline) = self {
      pipeline.upload_now();
    }
  }

  pub async fn stop(&mut self) {
    if let Self::Running(pipeline) = std::mem::take(self) {
      pipeline.stop().await;
    }
  }
}
