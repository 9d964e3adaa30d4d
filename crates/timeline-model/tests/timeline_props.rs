use montage_timeline_model::{total_duration, video_clips_sorted, Clip, ExportRequest, Preset};
use proptest::prelude::*;

fn arb_clip() -> impl Strategy<Value = Clip> {
    (
        any::<bool>(),
        0.0f64..120.0,
        0.0f64..30.0,
        0.05f64..20.0,
        0u8..4,
    )
        .prop_map(|(video, start, in_point, duration, n)| {
            let id = format!("c{n}-{start:.3}");
            if video {
                Clip::video(id, format!("/media/{n}.mp4"), start, in_point, duration)
            } else {
                Clip::audio(id, format!("/media/{n}.wav"), start, in_point, duration)
            }
        })
}

proptest! {
    #[test]
    fn prop_total_duration_is_positive(clips in prop::collection::vec(arb_clip(), 0..12)) {
        prop_assert!(total_duration(&clips) > 0.0);
    }

    #[test]
    fn prop_total_duration_ignores_audio_when_video_present(
        clips in prop::collection::vec(arb_clip(), 1..12)
    ) {
        let video_sum: f64 = clips.iter().filter(|c| c.is_video()).map(|c| c.duration).sum();
        if video_sum > 0.0 {
            prop_assert!((total_duration(&clips) - video_sum).abs() < 1e-9);
        } else {
            let furthest = clips.iter().map(Clip::end_time).fold(0.0, f64::max);
            prop_assert!((total_duration(&clips) - furthest).abs() < 1e-9);
        }
    }

    #[test]
    fn prop_video_clips_sorted_is_stable_and_complete(
        clips in prop::collection::vec(arb_clip(), 0..12)
    ) {
        let sorted = video_clips_sorted(&clips);
        prop_assert_eq!(sorted.len(), clips.iter().filter(|c| c.is_video()).count());
        prop_assert!(sorted.iter().all(|c| c.is_video()));

        for pair in sorted.windows(2) {
            prop_assert!(pair[0].start_time <= pair[1].start_time);
            if pair[0].start_time == pair[1].start_time {
                let pos = |clip: &Clip| clips.iter().position(|c| std::ptr::eq(c, clip));
                prop_assert!(pos(pair[0]) < pos(pair[1]));
            }
        }
    }

    #[test]
    fn prop_generated_requests_validate(clips in prop::collection::vec(arb_clip(), 1..8)) {
        let request = ExportRequest::new(clips, "/exports/out.mp4", Preset::Normal);
        prop_assert!(request.validate().is_ok());
    }
}
