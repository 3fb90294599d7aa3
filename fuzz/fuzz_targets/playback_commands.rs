#![no_main]

use libfuzzer_sys::fuzz_target;
use reelbox::audio::{EngineEventKind, ScriptedEngine};
use reelbox::config::ControllerOptions;
use reelbox::core::PlaybackController;
use reelbox::session::MemorySessionStore;
use reelbox::store::{BlobStore, MemoryBlobStore};
use std::sync::Arc;
use std::time::Duration;

fuzz_target!(|data: &[u8]| {
    let store = MemoryBlobStore::new();
    let len = (data.first().copied().unwrap_or(0) % 8) as usize;
    for idx in 0..len {
        let _ = store.put(&format!("track_{idx}.mp3"), &[idx as u8], "audio/mpeg");
    }
    let (engine, handle) = ScriptedEngine::new();
    let mut controller = PlaybackController::new(
        Arc::new(store),
        Box::new(MemorySessionStore::new()),
        Box::new(engine),
        ControllerOptions {
            rng_seed: Some(u64::from(data.len() as u32)),
            ..ControllerOptions::default()
        },
    );

    for byte in data.iter().skip(1) {
        match byte % 12 {
            0 => controller.play(),
            1 => controller.pause(),
            2 => controller.toggle_play_pause(),
            3 => controller.next(),
            4 => controller.previous(),
            5 => controller.seek(f64::from(*byte)),
            6 => controller.cycle_loop_mode(),
            7 => controller.toggle_random(),
            8 => handle.emit(EngineEventKind::Ended),
            9 => handle.emit(EngineEventKind::TimeUpdate {
                position_seconds: f64::from(*byte),
            }),
            10 => {
                if let Some(name) = controller.state().current_track_name {
                    controller.remove_track(&name);
                }
            }
            _ => {
                let _ = controller.wait_for_load(Duration::from_millis(50));
            }
        }
        controller.pump();

        let state = controller.state();
        assert_eq!(state.current_index.is_some(), state.current_track_name.is_some());
        if let Some(index) = state.current_index {
            assert_eq!(
                controller.library().name_at(index),
                state.current_track_name.as_deref()
            );
        }
    }
});
