//! Pacing behaviour against a paused tokio clock

use sfu_publish_core::testing::{RecordingSink, VecSource};
use sfu_publish_core::{
    ConnectivityGate, Error, MediaUnit, PaceOutcome, Pacer, PacingClock, PacingPolicy, Timebase,
};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sfu_publish_core=debug")
        .with_test_writer()
        .try_init();
}

fn assert_near(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual <= expected + Duration::from_millis(2),
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

#[tokio::test(start_paused = true)]
async fn test_units_emitted_on_schedule_after_gate() {
    init_tracing();

    let gate = ConnectivityGate::new();
    let waiter = gate.subscribe();
    let mut source = VecSource::uniform(3, Duration::from_millis(33));
    let mut sink = RecordingSink::new();
    let recorded = sink.clone();

    let task = tokio::spawn(async move {
        Pacer::new("video").run(&mut source, waiter, &mut sink).await
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(recorded.is_empty(), "no unit may be sent before connectivity");

    let opened_at = Instant::now();
    assert!(gate.fire());

    let report = assert_ok!(task.await.unwrap());
    assert_eq!(report.outcome, PaceOutcome::Exhausted);
    assert_eq!(report.units_sent, 3);

    let writes = recorded.writes();
    assert_eq!(writes.len(), 3);
    for (i, write) in writes.iter().enumerate() {
        assert_eq!(write.unit.payload.as_ref(), &[i as u8]);
        assert_near(write.at - opened_at, Duration::from_millis(33 * (i as u64 + 1)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_fixed_timebase_total_duration() {
    let interval = Timebase::new(1, 30).unwrap().unit_interval();
    let units: Vec<_> = (0..10u8)
        .map(|i| MediaUnit::new(vec![i], interval))
        .collect();

    let gate = ConnectivityGate::new();
    gate.fire();

    let mut source = VecSource::new(units);
    let mut sink = RecordingSink::new();
    let started = Instant::now();
    let report = Pacer::new("video")
        .run(&mut source, gate.subscribe(), &mut sink)
        .await
        .unwrap();

    assert_eq!(report.units_sent, 10);
    assert!(started.elapsed() >= interval * 9);

    let writes = sink.writes();
    for (i, write) in writes.iter().enumerate() {
        assert!(write.at - started >= interval * (i as u32 + 1));
    }
}

#[tokio::test(start_paused = true)]
async fn test_variable_durations_from_sample_clock() {
    let mut clock = PacingClock::new(48_000).unwrap();
    let units: Vec<_> = [960u64, 1920, 4800]
        .iter()
        .map(|granule| MediaUnit::new(vec![0u8], clock.advance(*granule)))
        .collect();

    let gate = ConnectivityGate::new();
    gate.fire();

    let mut source = VecSource::new(units);
    let mut sink = RecordingSink::new();
    let started = Instant::now();
    Pacer::new("audio")
        .run(&mut source, gate.subscribe(), &mut sink)
        .await
        .unwrap();

    let offsets: Vec<_> = sink.writes().iter().map(|w| w.at - started).collect();
    assert_near(offsets[0], Duration::from_millis(20));
    assert_near(offsets[1], Duration::from_millis(40));
    assert_near(offsets[2], Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_loop_forever_until_deadline() {
    let gate = ConnectivityGate::new();
    gate.fire();

    let mut source = VecSource::uniform(3, Duration::from_millis(10));
    let mut sink = RecordingSink::new();
    let report = Pacer::new("video")
        .with_policy(PacingPolicy::LoopForever)
        .with_deadline(Some(Duration::from_millis(95)))
        .run(&mut source, gate.subscribe(), &mut sink)
        .await
        .unwrap();

    assert_eq!(report.outcome, PaceOutcome::DeadlineReached);
    assert_eq!(report.units_sent, 9);
    assert_eq!(report.loops, 3);
    assert_eq!(source.resets(), 3);
    assert_near(report.elapsed, Duration::from_millis(95));

    let writes = sink.writes();
    let gaps: Vec<_> = writes.windows(2).map(|w| w[1].at - w[0].at).collect();
    for gap in gaps {
        assert_near(gap, Duration::from_millis(10));
    }
}

#[tokio::test(start_paused = true)]
async fn test_finite_source_ends_before_deadline() {
    let gate = ConnectivityGate::new();
    gate.fire();

    let mut source = VecSource::uniform(2, Duration::from_millis(10));
    let mut sink = RecordingSink::new();
    let report = Pacer::new("video")
        .with_deadline(Some(Duration::from_secs(10)))
        .run(&mut source, gate.subscribe(), &mut sink)
        .await
        .unwrap();

    assert_eq!(report.outcome, PaceOutcome::Exhausted);
    assert_eq!(report.units_sent, 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_before_connectivity_stops_pacer() {
    let gate = ConnectivityGate::new();
    let waiter = gate.subscribe();
    let mut source = VecSource::uniform(3, Duration::from_millis(10));
    let mut sink = RecordingSink::new();
    let recorded = sink.clone();

    let task = tokio::spawn(async move {
        Pacer::new("video").run(&mut source, waiter, &mut sink).await
    });

    gate.shutdown();
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.outcome, PaceOutcome::Stopped);
    assert_eq!(report.units_sent, 0);
    assert!(recorded.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_mid_stream_stops_pacer() {
    let gate = ConnectivityGate::new();
    let waiter = gate.subscribe();
    let mut source = VecSource::uniform(100, Duration::from_millis(10));
    let mut sink = RecordingSink::new();

    gate.fire();
    let task = tokio::spawn(async move {
        Pacer::new("video").run(&mut source, waiter, &mut sink).await
    });

    tokio::time::sleep(Duration::from_millis(55)).await;
    gate.shutdown();

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.outcome, PaceOutcome::Stopped);
    assert_eq!(report.units_sent, 5);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_stalled_source() {
    let gate = ConnectivityGate::new();
    let waiter = gate.subscribe();
    let mut source = VecSource::uniform(5, Duration::from_millis(10)).stalling_at(2);
    let mut sink = RecordingSink::new();

    gate.fire();
    let task = tokio::spawn(async move {
        Pacer::new("camera").run(&mut source, waiter, &mut sink).await
    });

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!task.is_finished());
    gate.shutdown();

    let report = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("pacer ignored shutdown")
        .unwrap()
        .unwrap();
    assert_eq!(report.outcome, PaceOutcome::Stopped);
    assert_eq!(report.units_sent, 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_stalled_sink() {
    let gate = ConnectivityGate::new();
    let waiter = gate.subscribe();
    let mut source = VecSource::uniform(5, Duration::from_millis(10));
    let mut sink = RecordingSink::new().stalling_after(1);
    let recorded = sink.clone();

    gate.fire();
    let task = tokio::spawn(async move {
        Pacer::new("video").run(&mut source, waiter, &mut sink).await
    });

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!task.is_finished());
    gate.shutdown();

    let report = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("pacer ignored shutdown")
        .unwrap()
        .unwrap();
    assert_eq!(report.outcome, PaceOutcome::Stopped);
    assert_eq!(report.units_sent, 1);
    assert_eq!(recorded.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sink_error_ends_pacer() {
    let gate = ConnectivityGate::new();
    gate.fire();

    let mut source = VecSource::uniform(5, Duration::from_millis(10));
    let mut sink = RecordingSink::new().failing_after(2);
    let err = assert_err!(
        Pacer::new("video")
            .run(&mut source, gate.subscribe(), &mut sink)
            .await
    );

    assert!(matches!(err, Error::MediaSink(_)));
    assert!(err.is_pacer_local());
    assert_eq!(sink.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_source_error_ends_pacer() {
    let gate = ConnectivityGate::new();
    gate.fire();

    let mut source = VecSource::uniform(5, Duration::from_millis(10)).failing_at(3);
    let mut sink = RecordingSink::new();
    let err = Pacer::new("video")
        .run(&mut source, gate.subscribe(), &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MediaSource(_)));
    assert_eq!(sink.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_looping_an_empty_source_is_an_error() {
    let gate = ConnectivityGate::new();
    gate.fire();

    let mut source = VecSource::new(Vec::new());
    let mut sink = RecordingSink::new();
    let err = Pacer::new("video")
        .with_policy(PacingPolicy::LoopForever)
        .run(&mut source, gate.subscribe(), &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MediaSource(_)));
}

#[tokio::test(start_paused = true)]
async fn test_pacers_share_only_the_gate() {
    let gate = ConnectivityGate::new();
    let video_sink = RecordingSink::new();
    let audio_sink = RecordingSink::new();

    let video = Pacer::new("video").spawn(
        Box::new(VecSource::uniform(3, Duration::from_millis(33))),
        gate.subscribe(),
        Box::new(video_sink.clone()),
    );
    let audio = Pacer::new("audio").spawn(
        Box::new(VecSource::uniform(5, Duration::from_millis(20))),
        gate.subscribe(),
        Box::new(audio_sink.clone()),
    );

    gate.fire();

    let video = video.await.unwrap().unwrap();
    let audio = audio.await.unwrap().unwrap();
    assert_eq!(video.units_sent, 3);
    assert_eq!(audio.units_sent, 5);
    assert_eq!(video_sink.len(), 3);
    assert_eq!(audio_sink.len(), 5);
}
