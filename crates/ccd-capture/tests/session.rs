//! Integration tests for capture sessions driven against the mock camera
//!
//! Each group drives a `CaptureSession` through its public commands and
//! tick, then checks both the events it published and the calls the
//! simulated camera received.

use ccd_capture::{
    CameraRegistry, CaptureSession, CaptureThreadState, ExposureState, PulseState,
    SetpointOutcome,
};
use ccd_core::{
    Binning, CaptureConfig, CaptureError, ControlId, ControlValue, DeviceIO, EventLog, FrameKind,
    GuideAxis, GuideDirection, PixelFormat, Roi, SessionEvent, TemperatureStatus,
};
use ccd_driver_mock::{
    DeviceCall, ErrorConfig, ErrorScenario, InjectedFault, MockCamera, MockCameraBuilder,
    MockProvider,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn fast_config() -> CaptureConfig {
    CaptureConfig {
        spin_poll_quantum_ms: 1,
        spin_poll_max_iterations: 5,
        stream_exposure_s: 0.01,
        ..CaptureConfig::default()
    }
}

fn connect(builder: MockCameraBuilder) -> (CaptureSession, Arc<MockCamera>, Arc<EventLog>) {
    connect_with(builder, fast_config())
}

fn connect_with(
    builder: MockCameraBuilder,
    config: CaptureConfig,
) -> (CaptureSession, Arc<MockCamera>, Arc<EventLog>) {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();

    let camera = Arc::new(builder.build());
    let events = Arc::new(EventLog::new());
    let session = CaptureSession::connect("cam", camera.clone(), config, events.clone())
        .expect("session connects");
    (session, camera, events)
}

fn small() -> MockCameraBuilder {
    MockCamera::builder().resolution(64, 48)
}

/// Tick until `predicate` matches a published event or the deadline passes.
fn tick_until(
    session: &mut CaptureSession,
    events: &EventLog,
    timeout: Duration,
    predicate: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        session.tick();
        let batch: Vec<SessionEvent> = events.drain().into_iter().map(|(_, e)| e).collect();
        let hit = batch.iter().any(&predicate);
        seen.extend(batch);
        if hit {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    seen
}

mod exposure {
    use super::*;

    fn exposure_labels(events: &EventLog) -> Vec<&'static str> {
        events
            .labels()
            .into_iter()
            .filter(|label| label.starts_with("exposure"))
            .collect()
    }

    #[test]
    fn test_exposure_publishes_progress_then_frame() {
        let (mut session, _camera, events) = connect(small());
        session.start_exposure(10.0, FrameKind::Light).unwrap();

        session.tick();
        let labels = events.labels();
        assert!(labels.contains(&"exposure_progress"), "got {:?}", labels);
        events.drain();

        session.abort().unwrap();
        session.start_exposure(0.01, FrameKind::Light).unwrap();
        session.tick_at(Instant::now() + Duration::from_secs(1));

        let frame = events.drain().into_iter().find_map(|(_, e)| match e {
            SessionEvent::ExposureComplete(frame) => Some(frame),
            _ => None,
        });
        let frame = frame.expect("exposure completes on the first late tick");
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.bits_per_pixel, 16);
        assert_eq!(session.exposure_state(), &ExposureState::Complete);
    }

    #[test]
    fn test_time_left_reaches_epsilon_within_one_tick() {
        let (mut session, _camera, _events) = connect(small());
        let duration = 0.5;
        session.start_exposure(duration, FrameKind::Light).unwrap();

        let start = Instant::now();
        let tick = session.config().tick_period();
        let mut previous = f64::INFINITY;
        let mut step = Duration::ZERO;
        loop {
            let left = session.exposure_time_left(start + step).unwrap();
            assert!(left <= previous, "time left must not increase");
            previous = left;
            if left <= session.config().exposure_epsilon_s {
                break;
            }
            step += tick;
        }
        assert!(step <= Duration::from_secs_f64(duration) + tick);
    }

    #[test]
    fn test_status_failures_restart_then_complete() {
        let (mut session, camera, events) = connect(small().error_config(ErrorConfig::scenario(
            ErrorScenario::FailNext {
                operation: "exposure_status",
                times: 2,
                fault: InjectedFault::Transient,
            },
        )));
        session.start_exposure(0.01, FrameKind::Dark).unwrap();

        for _ in 0..5 {
            session.tick_at(Instant::now() + Duration::from_secs(1));
        }
        assert!(events.labels().contains(&"exposure_complete"));
        let starts = camera.count_calls(|c| matches!(c, DeviceCall::StartExposure { dark: true, .. }));
        assert_eq!(starts, 3, "two restarts after two failures");
    }

    #[test]
    fn test_status_failures_exhaust_retries() {
        let (mut session, camera, events) = connect(small().error_config(ErrorConfig::scenario(
            ErrorScenario::FailNext {
                operation: "exposure_status",
                times: 100,
                fault: InjectedFault::Transient,
            },
        )));
        session.start_exposure(0.01, FrameKind::Light).unwrap();

        for _ in 0..10 {
            session.tick_at(Instant::now() + Duration::from_secs(1));
        }
        let failures: Vec<String> = events
            .drain()
            .into_iter()
            .filter_map(|(_, e)| match e {
                SessionEvent::ExposureFailed { reason } => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("exceeded retries"));
        assert_eq!(
            camera.count_calls(|c| matches!(c, DeviceCall::StartExposure { .. })),
            3
        );
    }

    #[test]
    fn test_transient_download_error_restarts_exposure() {
        let (mut session, camera, events) = connect(small().error_config(ErrorConfig::scenario(
            ErrorScenario::FailNext {
                operation: "read_frame",
                times: 1,
                fault: InjectedFault::Transient,
            },
        )));
        session.start_exposure(0.01, FrameKind::Light).unwrap();

        for _ in 0..3 {
            session.tick_at(Instant::now() + Duration::from_secs(1));
        }
        assert_eq!(exposure_labels(&events), vec!["exposure_complete"]);
        assert_eq!(
            camera.count_calls(|c| matches!(c, DeviceCall::StartExposure { .. })),
            2,
            "one restart after the failed download"
        );
    }

    #[test]
    fn test_hardware_download_error_fails_then_session_recovers() {
        let (mut session, camera, events) = connect(small().error_config(ErrorConfig::scenario(
            ErrorScenario::FailNext {
                operation: "read_frame",
                times: 1,
                fault: InjectedFault::Hardware,
            },
        )));
        session.start_exposure(0.01, FrameKind::Light).unwrap();
        session.tick_at(Instant::now() + Duration::from_secs(1));

        assert_eq!(exposure_labels(&events), vec!["exposure_failed"]);
        assert!(matches!(session.exposure_state(), ExposureState::Failed { .. }));
        assert_eq!(
            camera.count_calls(|c| matches!(c, DeviceCall::StartExposure { .. })),
            1,
            "hardware failures are not retried"
        );

        events.drain();
        session.start_exposure(0.01, FrameKind::Light).unwrap();
        session.tick_at(Instant::now() + Duration::from_secs(1));
        assert_eq!(exposure_labels(&events), vec!["exposure_complete"]);
    }

    #[test]
    fn test_abort_publishes_and_ignores_retry_state() {
        let (mut session, camera, events) = connect(small().error_config(ErrorConfig::scenario(
            ErrorScenario::FailNext {
                operation: "exposure_status",
                times: 1,
                fault: InjectedFault::Transient,
            },
        )));
        session.start_exposure(0.01, FrameKind::Light).unwrap();
        session.tick_at(Instant::now() + Duration::from_secs(1));
        assert!(matches!(
            session.exposure_state(),
            ExposureState::PollingCompletion { retries: 1, .. }
        ));

        session.abort().unwrap();
        assert_eq!(session.exposure_state(), &ExposureState::Aborted);
        assert!(events.labels().contains(&"exposure_aborted"));
        assert!(!camera.exposure_in_progress());
    }

    #[test]
    fn test_bad_frame_geometry_rejected_without_change() {
        let (mut session, _camera, _events) = connect(small());
        let before = *session.layout();

        let err = session.set_roi(Roi::new(40, 0, 64, 48)).unwrap_err();
        assert!(matches!(err, CaptureError::Configuration(_)));
        let err = session.set_binning(Binning::new(3, 3)).unwrap_err();
        assert!(matches!(err, CaptureError::Configuration(_)));
        assert_eq!(*session.layout(), before);

        session.set_binning(Binning::new(2, 2)).unwrap();
        assert_eq!(session.layout().buffer_len(), 32 * 24 * 2 + 512);
    }
}

mod streaming {
    use super::*;

    #[test]
    fn test_stream_switches_to_luma_and_delivers_frames() {
        let (mut session, _camera, events) = connect(small());
        assert_eq!(session.layout().format, PixelFormat::Raw16);

        session.set_streaming(true).unwrap();
        assert_eq!(session.layout().format, PixelFormat::Luma8);
        assert!(events.labels().contains(&"format_changed"));

        let seen = tick_until(&mut session, &events, Duration::from_secs(5), |e| {
            matches!(e, SessionEvent::FrameReady(_))
        });
        let frame = seen
            .into_iter()
            .find_map(|e| match e {
                SessionEvent::FrameReady(frame) => Some(frame),
                _ => None,
            })
            .expect("a streamed frame");
        assert_eq!(frame.data.len(), 64 * 48);
        assert!(!frame.compressed);
    }

    #[test]
    fn test_exposure_and_stream_exclude_each_other() {
        let (mut session, _camera, _events) = connect(small());
        session.start_exposure(30.0, FrameKind::Light).unwrap();
        assert!(matches!(session.set_streaming(true), Err(CaptureError::Busy(_))));
        session.abort().unwrap();

        session.set_streaming(true).unwrap();
        assert!(matches!(
            session.start_exposure(1.0, FrameKind::Light),
            Err(CaptureError::Busy(_))
        ));
    }

    #[test]
    fn test_non_streamable_format_rejected_while_streaming() {
        let (mut session, _camera, _events) = connect(small());
        session.set_streaming(true).unwrap();
        let err = session.set_pixel_format(PixelFormat::Raw16).unwrap_err();
        assert!(matches!(err, CaptureError::Configuration(_)));
        assert_eq!(session.layout().format, PixelFormat::Luma8);
        assert!(session.is_streaming());
    }

    #[test]
    fn test_stream_refused_without_streamable_format() {
        let (mut session, _camera, _events) = connect(small().formats(vec![PixelFormat::Raw16]));
        let err = session.set_streaming(true).unwrap_err();
        assert!(matches!(err, CaptureError::Configuration(_)));
        assert!(!session.is_streaming());
    }

    #[test]
    fn test_failed_stream_start_restores_previous_format() {
        let (mut session, camera, events) = connect(small().error_config(ErrorConfig::scenario(
            ErrorScenario::FailNext {
                operation: "start_video_capture",
                times: 1,
                fault: InjectedFault::Hardware,
            },
        )));

        assert!(session.set_streaming(true).is_err());
        assert!(!session.is_streaming());
        assert_eq!(session.layout().format, PixelFormat::Raw16);
        assert_eq!(camera.layout().format, PixelFormat::Raw16);
        assert!(!events.labels().contains(&"format_changed"));

        session.set_streaming(true).unwrap();
        assert_eq!(session.layout().format, PixelFormat::Luma8);
        assert!(events.labels().contains(&"format_changed"));
    }

    #[test]
    fn test_stop_while_blocked_then_resume_on_same_thread() {
        let (mut session, camera, events) = connect(small());
        let worker_thread = session.worker_thread_id();
        camera.set_video_stalled(true);
        session.set_streaming(true).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(session.stream_state(), CaptureThreadState::Streaming);

        session.set_streaming(false).unwrap();
        let limit = CaptureConfig::video_timeout(session.config().stream_exposure_s);
        let deadline = Instant::now() + limit + Duration::from_millis(200);
        while session.stream_state() != CaptureThreadState::Idle && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(session.stream_state(), CaptureThreadState::Idle);

        camera.set_video_stalled(false);
        session.set_streaming(true).unwrap();
        let seen = tick_until(&mut session, &events, Duration::from_secs(5), |e| {
            matches!(e, SessionEvent::FrameReady(_))
        });
        assert!(seen.iter().any(|e| matches!(e, SessionEvent::FrameReady(_))));
        assert_eq!(session.worker_thread_id(), worker_thread);
    }

    #[test]
    fn test_roi_change_while_streaming_resizes_frames() {
        let (mut session, _camera, events) = connect(small());
        session.set_streaming(true).unwrap();
        session.set_roi(Roi::new(0, 0, 32, 16)).unwrap();
        assert!(session.is_streaming());
        events.drain();

        let seen = tick_until(&mut session, &events, Duration::from_secs(5), |e| {
            matches!(e, SessionEvent::FrameReady(f) if f.width == 32)
        });
        let frame = seen
            .into_iter()
            .find_map(|e| match e {
                SessionEvent::FrameReady(frame) if frame.width == 32 => Some(frame),
                _ => None,
            })
            .expect("frame with the new geometry");
        assert_eq!(frame.data.len(), 32 * 16);
    }

    #[test]
    fn test_compression_toggle_applies_to_next_frames() {
        let (mut session, _camera, events) = connect(small());
        session.set_compression(true);
        session.set_streaming(true).unwrap();

        let seen = tick_until(&mut session, &events, Duration::from_secs(5), |e| {
            matches!(e, SessionEvent::FrameReady(_))
        });
        let frame = seen
            .into_iter()
            .find_map(|e| match e {
                SessionEvent::FrameReady(frame) => Some(frame),
                _ => None,
            })
            .expect("a streamed frame");
        assert!(frame.compressed);
        assert_eq!((frame.width, frame.height), (64, 48));
    }

    #[test]
    fn test_read_failure_stops_stream_and_is_reported() {
        let (mut session, camera, events) = connect(small().error_config(ErrorConfig::scenario(
            ErrorScenario::FailNext {
                operation: "read_video_frame",
                times: 1000,
                fault: InjectedFault::Hardware,
            },
        )));
        session.set_streaming(true).unwrap();

        let seen = tick_until(&mut session, &events, Duration::from_secs(5), |e| {
            matches!(e, SessionEvent::StreamStopped { .. })
        });
        assert!(seen
            .iter()
            .any(|e| matches!(e, SessionEvent::StreamStopped { .. })));
        assert!(!session.is_streaming());
        assert!(!camera.is_video_running());

        // The session keeps accepting commands.
        session.start_exposure(0.01, FrameKind::Light).unwrap();
    }
}

mod guiding {
    use super::*;

    fn pulse_counts(camera: &MockCamera) -> (usize, usize) {
        (
            camera.count_calls(|c| matches!(c, DeviceCall::PulseOn(_))),
            camera.count_calls(|c| matches!(c, DeviceCall::PulseOff(_))),
        )
    }

    #[test]
    fn test_short_pulse_completes_inline() {
        let (mut session, camera, events) = connect(small());
        let started = Instant::now();
        let state = session
            .guide(GuideAxis::NorthSouth, GuideDirection::North, 100)
            .unwrap();

        assert_eq!(state, PulseState::Complete);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(pulse_counts(&camera), (1, 1));
        assert!(!session.guide_busy(GuideAxis::NorthSouth));
        assert!(events.labels().contains(&"guide_complete"));
    }

    #[test]
    fn test_replacing_long_pulse_switches_off_once() {
        let (mut session, camera, events) = connect(small());
        let state = session
            .guide(GuideAxis::NorthSouth, GuideDirection::North, 1000)
            .unwrap();
        assert_eq!(state, PulseState::Busy);

        session
            .guide(GuideAxis::NorthSouth, GuideDirection::South, 50)
            .unwrap();
        let guide_events: Vec<&str> = events
            .labels()
            .into_iter()
            .filter(|l| l.starts_with("guide"))
            .collect();
        assert_eq!(
            guide_events,
            vec!["guide_complete", "guide_complete"],
            "pre-empted pulse and the short pulse both report completion"
        );
        session.tick_at(Instant::now() + Duration::from_secs(2));

        let north_off = camera.count_calls(|c| *c == DeviceCall::PulseOff(GuideDirection::North));
        assert_eq!(north_off, 1, "pre-empted pulse is switched off exactly once");
        assert_eq!(pulse_counts(&camera), (2, 2));
    }

    #[test]
    fn test_axes_are_independent() {
        let (mut session, _camera, events) = connect(small());
        session
            .guide(GuideAxis::NorthSouth, GuideDirection::North, 600)
            .unwrap();
        session
            .guide(GuideAxis::WestEast, GuideDirection::East, 600)
            .unwrap();
        assert!(session.guide_busy(GuideAxis::NorthSouth));
        assert!(session.guide_busy(GuideAxis::WestEast));

        session.tick_at(Instant::now() + Duration::from_secs(1));
        let completed: Vec<GuideAxis> = events
            .drain()
            .into_iter()
            .filter_map(|(_, e)| match e {
                SessionEvent::GuideComplete(axis) => Some(axis),
                _ => None,
            })
            .collect();
        assert_eq!(completed.len(), 2);
        assert!(completed.contains(&GuideAxis::NorthSouth));
        assert!(completed.contains(&GuideAxis::WestEast));
    }

    #[test]
    fn test_no_guide_port_is_unsupported() {
        let (mut session, _camera, _events) = connect(small().st4(false));
        let err = session
            .guide(GuideAxis::NorthSouth, GuideDirection::North, 100)
            .unwrap_err();
        assert!(matches!(err, CaptureError::Unsupported(_)));
    }
}

mod cooling {
    use super::*;

    #[test]
    fn test_setpoint_converges_through_ticks() {
        let (mut session, camera, events) = connect(small());
        camera.force_temperature(Some(20.0));
        session.tick();
        events.drain();

        let outcome = session.set_temperature(-5.0).unwrap();
        assert_eq!(outcome, SetpointOutcome::Converging);
        assert_eq!(session.temperature().status, TemperatureStatus::Converging);

        camera.force_temperature(Some(-4.9));
        for _ in 0..session.config().temp_poll_divisor {
            session.tick();
        }
        assert_eq!(session.temperature().status, TemperatureStatus::Converged);

        let statuses: Vec<TemperatureStatus> = events
            .drain()
            .into_iter()
            .filter_map(|(_, e)| match e {
                SessionEvent::Temperature(report) => Some(report.status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses.first(), Some(&TemperatureStatus::Converging));
        assert_eq!(statuses.last(), Some(&TemperatureStatus::Converged));
    }

    #[test]
    fn test_nearby_setpoint_is_a_no_op() {
        let (mut session, camera, _events) = connect(small());
        camera.force_temperature(Some(20.0));
        session.tick();
        camera.clear_calls();

        let outcome = session.set_temperature(20.2).unwrap();
        assert_eq!(outcome, SetpointOutcome::AlreadySatisfied);
        assert!(camera.calls().is_empty());
        assert_eq!(session.temperature().status, TemperatureStatus::Idle);
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn test_disconnect_order() {
        let (mut session, camera, _events) = connect(small());
        session
            .guide(GuideAxis::WestEast, GuideDirection::West, 5000)
            .unwrap();
        session.start_exposure(30.0, FrameKind::Light).unwrap();
        camera.clear_calls();

        session.disconnect().unwrap();
        assert_eq!(
            camera.calls(),
            vec![
                DeviceCall::PulseOff(GuideDirection::West),
                DeviceCall::AbortExposure,
                DeviceCall::Close,
            ]
        );
        assert_eq!(session.stream_state(), CaptureThreadState::Terminated);
        assert!(matches!(
            session.start_exposure(1.0, FrameKind::Light),
            Err(CaptureError::NotConnected)
        ));
        session.disconnect().unwrap();
    }

    #[test]
    fn test_drop_stops_streaming_and_closes() {
        let (mut session, camera, _events) = connect(small());
        session.set_streaming(true).unwrap();
        drop(session);
        assert!(camera.is_closed());
        assert!(!camera.is_video_running());
    }

    #[test]
    fn test_refresh_controls_picks_up_device_changes() {
        let (mut session, camera, _events) = connect(small());
        camera.set_control(ControlId::Gain, 250.0, true).unwrap();
        assert_ne!(
            session.controls().get(ControlId::Gain).map(|e| e.value),
            Some(ControlValue {
                value: 250.0,
                auto: true
            })
        );

        session.refresh_controls().unwrap();
        assert_eq!(
            session.controls().get(ControlId::Gain).map(|e| e.value),
            Some(ControlValue {
                value: 250.0,
                auto: true
            })
        );

        session.disconnect().unwrap();
        assert!(matches!(
            session.refresh_controls(),
            Err(CaptureError::NotConnected)
        ));
    }

    #[test]
    fn test_serialized_access_still_completes_exposures() {
        let config = CaptureConfig {
            serialize_device_access: true,
            ..fast_config()
        };
        let (mut session, _camera, events) = connect_with(small(), config);
        session.start_exposure(0.01, FrameKind::Flat).unwrap();
        session.tick_at(Instant::now() + Duration::from_secs(1));
        assert!(events.labels().contains(&"exposure_complete"));
    }

    #[test]
    fn test_serialized_access_does_not_block_on_stalled_stream() {
        let config = CaptureConfig {
            serialize_device_access: true,
            stream_exposure_s: 2.0,
            ..fast_config()
        };
        let (mut session, camera, _events) = connect_with(small(), config);
        camera.set_video_stalled(true);
        session.set_streaming(true).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while session.stream_state() != CaptureThreadState::Streaming
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(session.stream_state(), CaptureThreadState::Streaming);
        // Let the worker settle into its blocked read.
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        let state = session
            .guide(GuideAxis::NorthSouth, GuideDirection::North, 10)
            .unwrap();
        let took = started.elapsed();
        assert_eq!(state, PulseState::Complete);
        assert!(took < Duration::from_millis(250), "10 ms pulse took {:?}", took);

        let started = Instant::now();
        session.set_streaming(false).unwrap();
        assert!(
            started.elapsed() < Duration::from_millis(250),
            "stop took {:?}",
            started.elapsed()
        );
        assert!(
            wait_idle(&session, Duration::from_millis(500)),
            "worker released by the stop"
        );
    }

    fn wait_idle(session: &CaptureSession, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if session.stream_state() == CaptureThreadState::Idle {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

mod registry {
    use super::*;

    #[test]
    fn test_duplicate_models_get_suffixes() {
        let provider = MockProvider::identical(3, small().name("ZWO ASI120MM"));
        let registry =
            CameraRegistry::discover(&provider, &fast_config(), Arc::new(EventLog::new())).unwrap();
        assert_eq!(
            registry.names(),
            vec!["ZWO ASI120MM", "ZWO ASI120MM 2", "ZWO ASI120MM 3"]
        );
    }

    #[test]
    fn test_max_devices_caps_discovery() {
        let provider = MockProvider::identical(5, small());
        let config = CaptureConfig {
            max_devices: 2,
            ..fast_config()
        };
        let registry = CameraRegistry::discover(&provider, &config, Arc::new(EventLog::new())).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(provider.opened().len(), 2);
    }

    #[test]
    fn test_shutdown_closes_every_camera() {
        let provider = MockProvider::identical(2, small());
        let events = Arc::new(EventLog::new());
        let mut registry = CameraRegistry::discover(&provider, &fast_config(), events).unwrap();
        registry.tick_all();
        registry.shutdown().unwrap();

        assert!(registry.is_empty());
        for camera in provider.opened() {
            assert!(camera.is_closed(), "every camera is closed at shutdown");
        }
    }
}
