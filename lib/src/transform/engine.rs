//! Whole runs: loading, transforming, and emitting classes
//!
//! Each class gets its own [`SymbolResolver`] (and so its own cache), while the [`ClassSource`]
//! behind them is shared between all the worker threads.

use super::{Error, Pipeline, RunReport};
use crate::jvm::resolver::{ClassSource, SymbolResolver};
use crate::jvm::{emitter, loader};
use crate::settings::Settings;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Load a class, run the pipeline over it, and emit it again
pub fn transform(
    bytes: &[u8],
    pipeline: &Pipeline,
    source: &dyn ClassSource,
    settings: &Settings,
) -> Result<Vec<u8>, Error> {
    let resolver = SymbolResolver::new(source);
    transform_with(bytes, pipeline, &resolver, settings).map(|(output, _)| output)
}

/// Like [`transform`], but with a caller-supplied resolver and returning the run report
pub fn transform_with(
    bytes: &[u8],
    pipeline: &Pipeline,
    resolver: &SymbolResolver,
    settings: &Settings,
) -> Result<(Vec<u8>, RunReport), Error> {
    let mut class = loader::load_with_max(bytes, settings.max_major_version)?;
    let class_name = class.name.to_string();
    let report = pipeline
        .run(&mut class, resolver, settings)
        .map_err(|err| err.in_class(&class_name))?;
    let output = emitter::emit(&class).map_err(|err| Error::from(err).in_class(&class_name))?;
    debug!("{}: emitted {} bytes", class_name, output.len());
    Ok((output, report))
}

/// Transform many classes in parallel
///
/// Results come back in input order. Only failing to set up the worker threads fails the whole
/// call; each class otherwise succeeds or fails on its own.
pub fn transform_all(
    inputs: &[Vec<u8>],
    pipeline: &Pipeline,
    source: &dyn ClassSource,
    settings: &Settings,
) -> Result<Vec<Result<Vec<u8>, Error>>, Error> {
    in_worker_pool(settings, || {
        inputs
            .par_iter()
            .map(|bytes| transform(bytes, pipeline, source, settings))
            .collect()
    })
}

/// What happened to one class file of a directory run
#[derive(Debug)]
pub struct FileOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    pub result: Result<RunReport, Error>,
}

/// Transform a class file, or every `.class` file under a directory, into `output_dir`
///
/// Files under a directory keep their relative path. A single file is written directly inside
/// `output_dir`.
pub fn transform_path(
    input: &Path,
    output_dir: &Path,
    pipeline: &Pipeline,
    source: &dyn ClassSource,
    settings: &Settings,
) -> Result<Vec<FileOutcome>, Error> {
    let jobs = output_paths(input, output_dir)?;
    info!(
        "Transforming {} class file(s) from '{}'",
        jobs.len(),
        input.display()
    );

    in_worker_pool(settings, || {
        jobs.into_par_iter()
            .map(|(input, output)| {
                let result = transform_file(&input, &output, pipeline, source, settings);
                if let Err(err) = &result {
                    warn!("Failed to transform '{}': {}", input.display(), err);
                }
                FileOutcome {
                    input,
                    output,
                    result,
                }
            })
            .collect()
    })
}

fn transform_file(
    input: &Path,
    output: &Path,
    pipeline: &Pipeline,
    source: &dyn ClassSource,
    settings: &Settings,
) -> Result<RunReport, Error> {
    let bytes = fs::read(input).map_err(|err| Error::Io {
        path: input.to_owned(),
        source: err,
    })?;
    let resolver = SymbolResolver::new(source);
    let (transformed, report) = transform_with(&bytes, pipeline, &resolver, settings)?;

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::Io {
            path: parent.to_owned(),
            source: err,
        })?;
    }
    fs::write(output, transformed).map_err(|err| Error::Io {
        path: output.to_owned(),
        source: err,
    })?;
    Ok(report)
}

/// Pair every input class file with the path it gets written to
fn output_paths(input: &Path, output_dir: &Path) -> Result<Vec<(PathBuf, PathBuf)>, Error> {
    if input.is_file() {
        let file_name = input.file_name().ok_or_else(|| Error::Io {
            path: input.to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file name"),
        })?;
        return Ok(vec![(input.to_owned(), output_dir.join(file_name))]);
    }
    if !input.is_dir() {
        return Err(Error::Io {
            path: input.to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
        });
    }

    let mut jobs: Vec<(PathBuf, PathBuf)> = class_files(input)
        .into_iter()
        .filter_map(|path| {
            let relative = path.strip_prefix(input).ok()?.to_owned();
            Some((path, output_dir.join(relative)))
        })
        .collect();
    jobs.sort();
    Ok(jobs)
}

/// Every `.class` file under a directory
pub fn class_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().map_or(false, |extension| extension == "class"))
        .collect()
}

/// Run a job on a dedicated pool if the thread count is fixed, on the global pool otherwise
fn in_worker_pool<T: Send>(settings: &Settings, job: impl FnOnce() -> T + Send) -> Result<T, Error> {
    match settings.threads {
        None => Ok(job()),
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
            Ok(pool.install(job))
        }
    }
}
