// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use ndarray::Array2;
use serial_test::serial;
use tempfile::TempDir;

use super::*;
use crate::{
    image::{ImageKind, MemoryImageStore},
    params::{FtMachine, Weighting},
    partition::{ChannelRange, PartitionAssignment, Selection},
    tests::{point_source_sky, small_grid, SkyEngine},
    PROGRESS_BARS,
};

const POLL: Duration = Duration::from_millis(1);

fn continuum_job(worker: usize, stem: &str) -> ContinuumJob {
    ContinuumJob {
        dataset: PathBuf::from("test.ms"),
        assignment: PartitionAssignment {
            worker,
            selection: Selection::Channels(vec![ChannelRange {
                spw: 0,
                start: 4 * worker,
                count: 4,
            }]),
        },
        channels: vec![ChannelRange {
            spw: 0,
            start: 4 * worker,
            count: 4,
        }],
        stem: stem.to_string(),
        grid: small_grid(),
        nterms: 1,
        reference_freq: 150e6,
        bandwidth: 4e6,
        model: None,
        weighting: Weighting::Natural,
        ftmachine: FtMachine::Ft,
        make_psf: true,
        make_coverage: false,
    }
}

struct Setup {
    pool: WorkerPool,
    engine: Arc<SkyEngine>,
    store: Arc<MemoryImageStore>,
    scratch: TempDir,
}

fn setup(num_workers: usize, engine: SkyEngine) -> Setup {
    let scratch = TempDir::new().unwrap();
    let engine = Arc::new(engine);
    let store = Arc::new(MemoryImageStore::new());
    let params = PoolParams {
        hosts: vec![],
        workers_per_host: num_workers,
        scratch_dirs: vec![scratch.path().to_path_buf()],
    };
    let pool = WorkerPool::setup(&params, engine.clone(), store.clone(), POLL).unwrap();
    Setup {
        pool,
        engine,
        store,
        scratch,
    }
}

#[test]
fn test_setup_and_teardown_scratch_dirs() {
    let Setup { pool, scratch, .. } = setup(3, SkyEngine::new(point_source_sky(1.0)));
    assert_eq!(pool.num_workers(), 3);
    let dirs: Vec<PathBuf> = pool.workers().iter().map(|w| w.scratch_dir.clone()).collect();
    for (i, dir) in dirs.iter().enumerate() {
        assert!(dir.is_dir());
        assert_eq!(dir, &scratch.path().join(format!("hyperimager_worker_{i}")));
    }
    assert!(pool.workers().iter().all(|w| w.state() == WorkerState::Ready));
    assert_eq!(pool.free_worker(), Some(0));

    pool.teardown();
    for dir in dirs {
        assert!(!dir.exists());
    }
}

#[test]
fn test_multiple_hosts() {
    let scratch = TempDir::new().unwrap();
    let params = PoolParams {
        hosts: vec!["node1".to_string(), "node2".to_string()],
        workers_per_host: 2,
        scratch_dirs: vec![scratch.path().to_path_buf()],
    };
    let pool = WorkerPool::setup(
        &params,
        Arc::new(SkyEngine::new(point_source_sky(1.0))),
        Arc::new(MemoryImageStore::new()),
        POLL,
    )
    .unwrap();
    let hosts: Vec<&str> = pool.workers().iter().map(|w| w.host.as_str()).collect();
    assert_eq!(hosts, ["node1", "node1", "node2", "node2"]);
    assert_eq!(pool.workers()[2].engine_id, "node2:2");
}

#[test]
fn test_setup_errors() {
    let scratch = TempDir::new().unwrap();
    let engine: Arc<dyn ImagingEngine> = Arc::new(SkyEngine::new(point_source_sky(1.0)));
    let store: Arc<dyn ImageStore> = Arc::new(MemoryImageStore::new());

    let mut params = PoolParams {
        hosts: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        workers_per_host: 1,
        scratch_dirs: vec![scratch.path().to_path_buf(), scratch.path().to_path_buf()],
    };
    let result = WorkerPool::setup(&params, engine.clone(), store.clone(), POLL);
    match result {
        Err(WorkerPoolError::ClusterSetup(msg)) => {
            assert_eq!(msg, "2 scratch directories were given for 3 hosts")
        }
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("a pool was made with too few scratch directories"),
    }

    params.scratch_dirs = vec![scratch.path().join("does_not_exist")];
    let result = WorkerPool::setup(&params, engine.clone(), store.clone(), POLL);
    assert!(matches!(result, Err(WorkerPoolError::ScratchDir(_))));

    params.scratch_dirs = vec![];
    params.workers_per_host = 0;
    let result = WorkerPool::setup(&params, engine, store, POLL);
    assert!(matches!(result, Err(WorkerPoolError::ClusterSetup(_))));
}

#[test]
fn test_dispatch_poll_and_pull() {
    let Setup {
        mut pool,
        engine,
        store,
        scratch: _scratch,
    } = setup(2, SkyEngine::new(point_source_sky(2.0)));

    let mut handle = pool
        .dispatch(1, &Job::Continuum(continuum_job(1, "img.Temp1")))
        .unwrap();
    assert_eq!(handle.worker, 1);
    assert_eq!(handle.job, "continuum");
    while !pool.poll(&mut handle) {
        thread::sleep(POLL);
    }
    // Polling a complete job keeps saying it's complete.
    assert!(pool.poll(&mut handle));
    let output = handle.take_outcome().unwrap().unwrap();
    let expected = crate::engine::PartialSummary {
        peak_residual: 2.0,
        peak_sumwt: 1.0,
    };
    assert_eq!(output, JobOutput::Partial(expected));
    assert!(store.exists(&ImageKind::Residual.name("img.Temp1", 0, 1)));
    assert_eq!(pool.workers()[1].current_job(), None);

    // Gridding alone doesn't compute a weight density.
    assert!(matches!(
        pool.pull(1, WEIGHT_GRID_VARIABLE),
        Err(WorkerPoolError::UnknownVariable { worker: 1, .. })
    ));
    let handle = pool.dispatch(1, &Job::WeightDensity).unwrap();
    assert_eq!(pool.wait(handle).unwrap(), JobOutput::Done);
    let WorkerValue::WeightGrid(g) = pool.pull(1, WEIGHT_GRID_VARIABLE).unwrap();
    assert_eq!(g, Array2::from_elem((2, 2), 2.0));
    // Worker 0 hasn't done anything.
    assert!(matches!(
        pool.pull(0, WEIGHT_GRID_VARIABLE),
        Err(WorkerPoolError::UnknownVariable { worker: 0, .. })
    ));

    let jobs = engine.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].worker, 1);
    assert!(jobs[0].scratch_dir_existed);
    assert!(jobs[0].scratch_dir.ends_with("hyperimager_worker_1"));
}

#[test]
fn test_wait_all_keeps_dispatch_order() {
    let mut engine = SkyEngine::new(point_source_sky(1.0));
    engine.fail_worker = Some(1);
    let Setup {
        mut pool,
        scratch: _scratch,
        ..
    } = setup(3, engine);

    let handles = (0..3)
        .map(|i| {
            pool.dispatch(i, &Job::Continuum(continuum_job(i, &format!("img.Temp{i}"))))
                .unwrap()
        })
        .collect();
    let results = pool.wait_all(handles, "Gridding");
    assert_eq!(results.len(), 3);
    assert!(matches!(results[0], Ok(JobOutput::Partial(_))));
    assert!(matches!(
        results[1],
        Err(WorkerPoolError::Job {
            worker: 1,
            job: "continuum",
            ..
        })
    ));
    assert!(matches!(results[2], Ok(JobOutput::Partial(_))));

    // A failed job doesn't take its worker down.
    assert_eq!(pool.workers()[1].state(), WorkerState::Ready);
}

#[test]
fn test_dispatch_to_unknown_worker() {
    let Setup {
        mut pool,
        scratch: _scratch,
        ..
    } = setup(1, SkyEngine::new(point_source_sky(1.0)));
    assert!(matches!(
        pool.dispatch(5, &Job::WeightDensity),
        Err(WorkerPoolError::NoSuchWorker {
            worker: 5,
            num_workers: 1
        })
    ));
}

#[test]
fn test_weight_density_round_trip() {
    let Setup {
        mut pool,
        engine,
        scratch: _scratch,
        ..
    } = setup(2, SkyEngine::new(point_source_sky(1.0)));

    let handles = (0..2)
        .map(|i| pool.dispatch(i, &Job::WeightDensity).unwrap())
        .collect();
    for result in pool.wait_all(handles, "Weight density") {
        assert_eq!(result.unwrap(), JobOutput::Done);
    }
    let WorkerValue::WeightGrid(g) = pool.pull(1, WEIGHT_GRID_VARIABLE).unwrap();
    assert_eq!(g, Array2::from_elem((2, 2), 2.0));

    let density = Array2::from_elem((2, 2), 3.0);
    let handle = pool
        .dispatch(
            0,
            &Job::SetWeightDensity {
                density: density.clone(),
            },
        )
        .unwrap();
    pool.wait(handle).unwrap();
    assert_eq!(engine.densities.lock().unwrap()[&0], density);
}

#[test]
fn test_cleanup_job() {
    let Setup {
        mut pool,
        store,
        scratch: _scratch,
        ..
    } = setup(1, SkyEngine::new(point_source_sky(1.0)));
    store.create("a.model", small_grid()).unwrap();
    store.create("a.psf", small_grid()).unwrap();
    store.create("b.psf", small_grid()).unwrap();

    let handle = pool
        .dispatch(
            0,
            &Job::Cleanup {
                images: vec!["a.model".to_string(), "a.psf".to_string(), "a.nope".to_string()],
            },
        )
        .unwrap();
    assert_eq!(pool.wait(handle).unwrap(), JobOutput::Done);
    assert_eq!(store.list("").unwrap(), vec!["b.psf"]);
}

#[test]
fn test_jobs_are_tagged_json() {
    let job = Job::Cleanup {
        images: vec!["x".to_string()],
    };
    let json: serde_json::Value = serde_json::to_value(&job).unwrap();
    assert_eq!(json["job"], "cleanup");
    assert_eq!(json["images"][0], "x");

    let job = Job::Continuum(continuum_job(0, "img.Temp0"));
    let text = serde_json::to_string(&job).unwrap();
    assert!(text.contains(r#""job":"continuum""#));
    let decoded: Job = serde_json::from_str(&text).unwrap();
    assert!(matches!(decoded, Job::Continuum(j) if j.stem == "img.Temp0" && j.nterms == 1));
}

#[test]
#[serial]
fn test_progress_bars_follow_the_global_flag() {
    PROGRESS_BARS.store(false);
    assert!(make_progress_bar(3, "Gridding").is_hidden());

    PROGRESS_BARS.store(true);
    let bar = make_progress_bar(3, "Gridding");
    assert_eq!(bar.length(), Some(3));
    assert_eq!(bar.position(), 0);
    bar.finish_and_clear();
    PROGRESS_BARS.store(false);
}

#[test]
#[serial]
fn test_wait_all_with_progress_bars() {
    PROGRESS_BARS.store(true);
    let Setup {
        mut pool,
        scratch: _scratch,
        ..
    } = setup(2, SkyEngine::new(point_source_sky(1.0)));
    let handles = (0..2)
        .map(|i| pool.dispatch(i, &Job::Continuum(continuum_job(i, &format!("img.Temp{i}")))))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let results = pool.wait_all(handles, "Gridding");
    PROGRESS_BARS.store(false);
    assert!(results.iter().all(|r| matches!(r, Ok(JobOutput::Partial(_)))));
    pool.teardown();
}
