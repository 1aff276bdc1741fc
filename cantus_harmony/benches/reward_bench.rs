//! Benchmarks for the reward model and the infilling controller.
//!
//! Run:
//! - cargo bench -p cantus_harmony

use cantus_harmony::config::VoiceRanges;
use cantus_harmony::grid::{Melody, Voice};
use cantus_harmony::infill::InfillController;
use cantus_harmony::model::ModelSession;
use cantus_harmony::prior::IntervalPriorModel;
use cantus_harmony::reward::{RewardContext, score_grid, score_step};
use cantus_harmony::style::StylePreset;
use cantus_prng::CantusRng;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

const MELODY_LENS: [usize; 3] = [16, 64, 256];

fn build_melody(len: usize) -> Melody {
    // A scale-wise line that turns around every octave.
    let scale = [67u8, 69, 71, 72, 74, 72, 71, 69];
    let pitches: Vec<u8> = (0..len).map(|i| scale[i % scale.len()]).collect();
    Melody::from_pitches(&pitches, 480, 480).expect("valid melody")
}

fn bench_score_step(c: &mut Criterion) {
    let style = StylePreset::classical();
    let voices = Voice::ALL;
    let ranges: Vec<_> = voices.iter().map(|v| v.default_range()).collect();
    let previous = [67u8, 62, 59, 43];
    let current = [69u8, 60, 57, 41];

    c.bench_function("score_step_satb", |b| {
        b.iter(|| {
            let ctx = RewardContext {
                previous: Some(&previous[..]),
                current: black_box(&current),
                voices: &voices,
                ranges: &ranges,
                style: &style,
                tonic: 7,
            };
            score_step(&ctx).expect("valid chord")
        })
    });
}

fn bench_infill_and_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("infill");
    group.sample_size(20);
    let style = StylePreset::classical();
    let voice_ranges = VoiceRanges::default();

    for &len in &MELODY_LENS {
        let melody = build_melody(len);
        group.bench_with_input(BenchmarkId::new("harmonize", len), &melody, |b, melody| {
            b.iter(|| {
                let mut session =
                    ModelSession::acquire(Box::new(IntervalPriorModel::default_model()));
                let mut rng = CantusRng::new(7);
                let mut controller =
                    InfillController::new(&mut session, 1.0, 8).expect("valid controller");
                let infilled = controller
                    .harmonize(melody, 3, &voice_ranges, &mut rng)
                    .expect("infill succeeds");
                let ranges = voice_ranges.for_voices(infilled.grid().voices());
                score_grid(infilled.grid(), &ranges, &style).expect("complete grid")
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_score_step, bench_infill_and_score);
criterion_main!(benches);
