// Performance benchmarks for the device selector
//
// Run with: cargo bench --bench selector_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use soundpath_core::domain::config::{FeatureFlags, TtyMode};
use soundpath_core::domain::hal::EchoReference;
use soundpath_core::domain::selector::*;

struct NullEcho;

impl EchoReference for NullEcho {
    fn set_echo_reference(&self, _enabled: bool) {}
}

fn bench_output_selection(c: &mut Criterion) {
    let flags = FeatureFlags::default();
    let ctx = SelectionContext {
        mode: AudioMode::Normal,
        tty_mode: TtyMode::Off,
        hac: false,
        flags: &flags,
    };

    let mut group = c.benchmark_group("output_selection");
    let cases = [
        ("speaker", OutputDevices::SPEAKER),
        ("headset", OutputDevices::WIRED_HEADSET),
        (
            "speaker_and_headset",
            OutputDevices::SPEAKER | OutputDevices::WIRED_HEADSET,
        ),
        ("bt_sco", OutputDevices::BT_SCO),
    ];
    for (name, req) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), &req, |b, &req| {
            b.iter(|| black_box(select_output_device(black_box(req), &ctx)));
        });
    }
    group.finish();
}

fn bench_input_selection(c: &mut Criterion) {
    let flags = FeatureFlags::default();
    let ctx = SelectionContext {
        mode: AudioMode::Normal,
        tty_mode: TtyMode::Off,
        hac: false,
        flags: &flags,
    };
    let echo = NullEcho;
    let input = ActiveInput {
        source: CaptureSource::VoiceCommunication,
        devices: InputDevices::BUILTIN_MIC,
        channels: 1,
        aec: true,
        ns: true,
    };

    c.bench_function("input_selection_comm_aec_ns", |b| {
        b.iter(|| {
            black_box(select_input_device(
                black_box(OutputDevices::SPEAKER),
                Some(&input),
                &ctx,
                &echo,
            ))
        });
    });
}

criterion_group!(benches, bench_output_selection, bench_input_selection);
criterion_main!(benches);
