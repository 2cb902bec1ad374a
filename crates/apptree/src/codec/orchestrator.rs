//! Whole-application passes over every section.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;
use log::{debug, error, info, warn};

use super::document::AppDocument;
use super::reader::read_section;
use super::schema::{describe, sections, SectionDescriptor, SECTION_APP};
use super::version::{resolve, StructuralVersion, VERSION_FIELD};
use super::writer::write_section;
use crate::cancel::CancelFlag;
use crate::error::{CodecError, Result};
use crate::options::CodecOptions;
use crate::sanitize::redact_path;
use crate::storage::{DiskStorage, Storage};
use crate::value::ConfigValue;

/// A section that failed during a best-effort pass.
#[derive(Debug)]
pub struct SectionFailure {
    pub section: String,
    /// The error, wrapped with the section name.
    pub error: CodecError,
}

/// Result of [`Codec::decode_all`].
#[derive(Debug)]
pub struct DecodeReport {
    pub version: StructuralVersion,
    pub document: AppDocument,
    /// Always empty unless running best-effort.
    pub failures: Vec<SectionFailure>,
}

impl DecodeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of [`Codec::encode_all`].
#[derive(Debug)]
pub struct EncodeReport {
    pub version: StructuralVersion,
    /// Files written, section by section in registry order.
    pub written: Vec<PathBuf>,
    /// Always empty unless running best-effort.
    pub failures: Vec<SectionFailure>,
}

impl EncodeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One unit of section work.
struct SectionJob<'a> {
    descriptor: &'static SectionDescriptor,
    value: Option<&'a ConfigValue>,
}

/// Converts between an application tree on disk and an [`AppDocument`].
pub struct Codec {
    storage: Arc<dyn Storage>,
    options: CodecOptions,
}

impl Codec {
    /// Creates a codec over the real directory at `options.root_dir`.
    pub fn new(options: CodecOptions) -> Self {
        let storage = Arc::new(DiskStorage::new(options.root_dir.clone()));
        Self { storage, options }
    }

    /// Creates a codec over any storage; `options.root_dir` is ignored.
    pub fn with_storage(storage: Arc<dyn Storage>, options: CodecOptions) -> Self {
        Self { storage, options }
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn root(&self) -> &Path {
        self.storage.root()
    }

    /// The version the tree is in: the configured override, else detected.
    pub fn resolve_version(&self) -> Result<StructuralVersion> {
        match self.options.version {
            Some(version) => Ok(version),
            None => resolve(self.storage.as_ref()),
        }
    }

    /// The version to write `document` in: the configured override, then the
    /// version the document declares, then the version of the existing tree.
    pub fn target_version(&self, document: &AppDocument) -> Result<StructuralVersion> {
        if let Some(version) = self.options.version {
            return Ok(version);
        }
        match document.declared_version() {
            Some(version) => Ok(version),
            None => resolve(self.storage.as_ref()),
        }
    }

    /// Reads every section present on disk into a document.
    ///
    /// Sections whose directory is absent are left out of the document.
    pub fn decode_all(&self, cancel: &CancelFlag) -> Result<DecodeReport> {
        let version = self.resolve_version()?;
        let _span = tracing::info_span!(
            "codec.decode",
            version = %version,
            root = %redact_path(self.root())
        )
        .entered();
        info!("Decoding application tree (version {})", version);

        let jobs = sections(version)
            .iter()
            .map(|descriptor| SectionJob {
                descriptor,
                value: None,
            })
            .collect();

        let storage = self.storage.as_ref();
        let outcomes = self.run_sections(jobs, cancel, |job| {
            let _span = tracing::info_span!("codec.decode_section", section = job.descriptor.name).entered();
            read_section(storage, job.descriptor, version, cancel)
        })?;

        let mut document = AppDocument::new();
        let mut failures = Vec::new();
        for (section, outcome) in outcomes {
            match outcome {
                Ok(Some(value)) => {
                    document.insert(section, value);
                }
                Ok(None) => {}
                Err(error) => failures.push(SectionFailure { section, error }),
            }
        }

        info!(
            "Decoded {} sections ({} failed)",
            document.len(),
            failures.len()
        );
        Ok(DecodeReport {
            version,
            document,
            failures,
        })
    }

    /// Writes every section of `document` in the given version's layout.
    ///
    /// A section the version does not know fails with `UnknownSection`. An
    /// app section declaring a different `config_version` is written with
    /// the target version instead.
    pub fn encode_all(
        &self,
        document: &AppDocument,
        version: StructuralVersion,
        cancel: &CancelFlag,
    ) -> Result<EncodeReport> {
        let _span = tracing::info_span!(
            "codec.encode",
            version = %version,
            root = %redact_path(self.root())
        )
        .entered();
        info!(
            "Encoding {} sections (version {})",
            document.len(),
            version
        );

        let mut failures = Vec::new();
        for name in document.section_names() {
            if let Err(e) = describe(name, version) {
                let e = e.in_section(name);
                if !self.options.best_effort {
                    return Err(e);
                }
                failures.push(SectionFailure {
                    section: name.to_string(),
                    error: e,
                });
            }
        }

        let app = document
            .section(SECTION_APP)
            .map(|value| with_config_version(value, version));

        let jobs = sections(version)
            .iter()
            .filter_map(|descriptor| {
                let value = if descriptor.name == SECTION_APP {
                    app.as_ref()
                } else {
                    document.section(descriptor.name)
                };
                value.map(|value| SectionJob {
                    descriptor,
                    value: Some(value),
                })
            })
            .collect();

        let storage = self.storage.as_ref();
        let prune = self.options.prune;
        let outcomes = self.run_sections(jobs, cancel, |job| {
            let _span = tracing::info_span!("codec.encode_section", section = job.descriptor.name).entered();
            match job.value {
                Some(value) => write_section(storage, job.descriptor, version, value, prune, cancel),
                None => Ok(Vec::new()),
            }
        })?;

        let mut written = Vec::new();
        for (section, outcome) in outcomes {
            match outcome {
                Ok(paths) => written.extend(paths),
                Err(error) => failures.push(SectionFailure { section, error }),
            }
        }

        info!("Wrote {} files ({} sections failed)", written.len(), failures.len());
        Ok(EncodeReport {
            version,
            written,
            failures,
        })
    }

    /// Reads a single section. `Ok(None)` if it is not on disk.
    pub fn decode_section(&self, name: &str, cancel: &CancelFlag) -> Result<Option<ConfigValue>> {
        let version = self.resolve_version()?;
        let descriptor = describe(name, version)?;
        cancel.check()?;
        read_section(self.storage.as_ref(), descriptor, version, cancel).map_err(|e| e.in_section(name))
    }

    /// Writes a single section and returns the files written.
    pub fn encode_section(
        &self,
        name: &str,
        value: &ConfigValue,
        version: StructuralVersion,
        cancel: &CancelFlag,
    ) -> Result<Vec<PathBuf>> {
        let descriptor = describe(name, version)?;
        cancel.check()?;
        write_section(
            self.storage.as_ref(),
            descriptor,
            version,
            value,
            self.options.prune,
            cancel,
        )
        .map_err(|e| e.in_section(name))
    }

    /// Runs `work` for every job and returns the outcomes in job order.
    ///
    /// Fail-fast returns the first error (in job order) wrapped with its
    /// section; best-effort returns every outcome. Cancellation is always
    /// returned as `Err(Cancelled)`.
    fn run_sections<T, F>(
        &self,
        jobs: Vec<SectionJob<'_>>,
        cancel: &CancelFlag,
        work: F,
    ) -> Result<Vec<(String, Result<T>)>>
    where
        T: Send,
        F: Fn(&SectionJob<'_>) -> Result<T> + Sync,
    {
        let names: Vec<&'static str> = jobs.iter().map(|j| j.descriptor.name).collect();
        let fail_fast = !self.options.best_effort;

        let results = if self.options.parallel && jobs.len() > 1 {
            run_parallel(jobs, cancel, fail_fast, &work)
        } else {
            let mut results = Vec::with_capacity(jobs.len());
            for job in &jobs {
                let result = cancel.check().and_then(|_| work(job));
                let failed = result.is_err();
                results.push(Some(result));
                if failed && fail_fast {
                    break;
                }
            }
            results
        };

        let mut outcomes = Vec::with_capacity(results.len());
        for (name, result) in names.into_iter().zip(results) {
            let Some(result) = result else {
                continue;
            };
            match result {
                Err(e) if e.is_cancelled() => return Err(CodecError::Cancelled),
                Err(e) => {
                    let e = e.in_section(name);
                    if fail_fast {
                        error!("Section {} failed: {}", name, e);
                        return Err(e);
                    }
                    warn!("Section {} failed, continuing: {}", name, e);
                    outcomes.push((name.to_string(), Err(e)));
                }
                Ok(value) => outcomes.push((name.to_string(), Ok(value))),
            }
        }
        Ok(outcomes)
    }
}

/// Dispatches jobs to scoped worker threads over a channel.
///
/// Returns one slot per job in job order; `None` marks a job skipped after
/// a fail-fast failure elsewhere.
fn run_parallel<T, F>(
    jobs: Vec<SectionJob<'_>>,
    cancel: &CancelFlag,
    fail_fast: bool,
    work: &F,
) -> Vec<Option<Result<T>>>
where
    T: Send,
    F: Fn(&SectionJob<'_>) -> Result<T> + Sync,
{
    let job_count = jobs.len();
    let worker_count = num_cpus::get().clamp(1, job_count.max(1));
    let (job_sender, job_receiver) = bounded(job_count);
    let (result_sender, result_receiver) = bounded(job_count);
    let stop = AtomicBool::new(false);

    for job in jobs.into_iter().enumerate() {
        // Capacity equals the job count, so this never blocks.
        if job_sender.send(job).is_err() {
            break;
        }
    }
    drop(job_sender);

    debug!("Starting {} section workers for {} sections", worker_count, job_count);

    thread::scope(|scope| {
        for worker_id in 0..worker_count {
            let job_receiver = job_receiver.clone();
            let result_sender = result_sender.clone();
            let stop = &stop;

            scope.spawn(move || {
                for (index, job) in job_receiver.iter() {
                    if stop.load(Ordering::Relaxed) {
                        continue;
                    }
                    let result = cancel.check().and_then(|_| work(&job));
                    if result.is_err() && fail_fast {
                        stop.store(true, Ordering::Relaxed);
                    }
                    if result_sender.send((index, result)).is_err() {
                        error!("Section worker {} lost its result channel", worker_id);
                        break;
                    }
                }
                debug!("Section worker {} finished", worker_id);
            });
        }
    });
    drop(result_sender);

    let mut slots: Vec<Option<Result<T>>> = (0..job_count).map(|_| None).collect();
    for (index, result) in result_receiver.iter() {
        slots[index] = Some(result);
    }
    slots
}

/// Returns the app section with `config_version` matching `version` when
/// it declares a different one.
fn with_config_version(app: &ConfigValue, version: StructuralVersion) -> ConfigValue {
    let mut app = app.clone();
    if let Some(map) = app.as_object_mut() {
        if let Some(declared) = map.get(VERSION_FIELD) {
            if StructuralVersion::from_value(declared) != Some(version) {
                warn!(
                    "App config declares {} {} but the tree is written as {}, updating it",
                    VERSION_FIELD, declared, version
                );
                map.insert(VERSION_FIELD.to_string(), ConfigValue::from(version.id()));
            }
        }
    }
    app
}
