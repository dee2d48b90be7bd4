use motionkit::demo;
use motionkit::{
    controller_options, CommandManager, Config, ControllerRegistry, MemoryLogSink, PreviewRunner,
    RunState, Vector3,
};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_settings_drive_controller_options() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[simulation]\ntick_ms = 4\n[hardware]\nio_timeout_ms = 250\n").unwrap();

    let config = Config::load_from_file(&path).unwrap();
    let options = controller_options(&config);
    assert_eq!(options.simulation_tick, Duration::from_millis(4));
    assert_eq!(options.io_timeout, Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn test_preview_then_execute_raster() {
    let registry = ControllerRegistry::builtin(controller_options(&Config::default()));
    let graph = Arc::new(demo::instrument(&registry).unwrap());
    let program = demo::raster_program(20.0, 3);

    let report = PreviewRunner::new(registry).run(&graph, &program).await.unwrap();
    assert!(report.is_clean(), "{:?}", report.failure);
    assert_eq!(report.completed_lines, program.len());
    assert!(report.samples.iter().any(|s| s.is_on));
    assert!(report.estimated_duration_s > 1.0);

    let log = MemoryLogSink::new();
    let scheduler = CommandManager::new(graph.clone(), Arc::new(log.clone()));
    for line in program {
        scheduler.enqueue_command_line(line).unwrap();
    }
    scheduler.start().await.unwrap();
    assert_eq!(scheduler.state(), RunState::Idle);

    graph.refresh_states().await.unwrap();
    let tool = graph.tool_information().unwrap();
    let state = tool.recalculate();
    assert_eq!(state.position, Vector3::new(0.0, 0.0, 0.0));
    assert!(!state.is_on);
    assert!(!state.is_out_of_bounds);
    assert!(log.contains("Line 12 done"));
}
