//! Master-audio mix graph.
//!
//! Every enabled audio track of every clip becomes one branch: its source
//! stream is trimmed to the clip's range, gained, resampled, faded and
//! delayed to the clip's timeline position. Branches are folded left to
//! right into a running accumulator that starts as a silent stereo bed
//! spanning the whole timeline, so the mix never outlasts the timeline.
//!
//! ```text
//! [0:a] silence ──┐
//!                 ├─ amix ─ [mix_0] ─┐
//! clip0/track0 ───┘                  ├─ amix ─ [mix_1] ─ ... ─ aformat ─ [aout]
//! clip0/track1 ──────────────────────┘
//! ```

use std::path::{Path, PathBuf};

use montage_timeline_model::Clip;

use crate::filter::{Filter, FilterChain, FilterGraph};

/// Sample rate of the master mix.
pub const MIX_SAMPLE_RATE: u32 = 48_000;

/// Pad of the silent bed (input 0).
pub const SILENCE_LABEL: &str = "0:a";

/// Final output pad of the graph.
pub const OUTPUT_LABEL: &str = "aout";

/// One trimmed, gained, faded and delayed track.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBranch {
    /// Position of the owning clip in the clip list.
    pub clip_index: usize,
    /// Position among the clip's enabled tracks.
    pub track_index: usize,
    /// Encoder input holding the clip's file.
    pub input_index: usize,
    /// Audio stream within that input.
    pub stream: u32,
    /// Source range `[start, end)` in seconds.
    pub start: f64,
    pub end: f64,
    /// Clip length on the timeline.
    pub duration: f64,
    pub volume: f64,
    pub fade_in: f64,
    pub fade_out: f64,
    /// Timeline offset applied to both channels.
    pub delay_ms: u64,
}

impl AudioBranch {
    /// Pad carrying the trimmed, undelayed branch.
    pub fn trim_label(&self) -> String {
        format!("clip{}_t{}", self.clip_index, self.track_index)
    }

    /// Pad carrying the branch at its timeline position.
    pub fn delay_label(&self) -> String {
        format!("delayed{}_t{}", self.clip_index, self.track_index)
    }

    fn trim_chain(&self) -> FilterChain {
        let duration = self.duration;
        FilterChain::new()
            .input(format!("{}:a:{}", self.input_index, self.stream))
            .filter(
                Filter::new("atrim")
                    .arg("start", self.start)
                    .arg("end", self.end),
            )
            .filter(Filter::new("asetpts").positional("PTS-STARTPTS"))
            .filter(Filter::new("volume").positional(self.volume))
            .filter(
                Filter::new("aresample")
                    .positional(MIX_SAMPLE_RATE)
                    .arg("async", 1),
            )
            .filter_if(self.fade_in > 0.0, || {
                Filter::new("afade")
                    .arg("t", "in")
                    .arg("ss", 0)
                    .arg("d", self.fade_in)
            })
            .filter_if(self.fade_out > 0.0, || {
                Filter::new("afade")
                    .arg("t", "out")
                    .arg("st", duration - self.fade_out)
                    .arg("d", self.fade_out)
            })
            .output(self.trim_label())
    }

    fn delay_chain(&self) -> FilterChain {
        FilterChain::new()
            .input(self.trim_label())
            .filter(Filter::new("adelay").positional(format!("{0}|{0}", self.delay_ms)))
            .output(self.delay_label())
    }
}

/// Two-input additive mix of the accumulator and one branch.
#[derive(Debug, Clone, PartialEq)]
pub struct MixNode {
    pub accumulator: String,
    pub branch: String,
    pub output: String,
}

impl MixNode {
    fn chain(&self) -> FilterChain {
        FilterChain::new()
            .input(self.accumulator.as_str())
            .input(self.branch.as_str())
            .filter(
                Filter::new("amix")
                    .arg("inputs", 2)
                    .arg("duration", "first")
                    .arg("dropout_transition", 0)
                    .arg("normalize", 0),
            )
            .output(self.output.as_str())
    }
}

/// The full mix: encoder inputs, branches and the fold over them.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioGraph {
    /// Unique source files, in first-appearance order. Input `n + 1`.
    inputs: Vec<PathBuf>,
    branches: Vec<AudioBranch>,
    mixes: Vec<MixNode>,
}

impl AudioGraph {
    /// Build the mix for `clips`, folding in clip-list then track-list order.
    pub fn build(clips: &[Clip]) -> Self {
        let mut inputs: Vec<PathBuf> = Vec::new();
        for clip in clips {
            if !inputs.iter().any(|p| p == &clip.file_path) {
                inputs.push(clip.file_path.clone());
            }
        }

        let mut branches = Vec::new();
        let mut mixes = Vec::new();
        let mut accumulator = SILENCE_LABEL.to_string();

        for (clip_index, clip) in clips.iter().enumerate() {
            let input_index = input_index_of(&inputs, &clip.file_path);
            for (track_index, track) in clip.enabled_tracks().enumerate() {
                let branch = AudioBranch {
                    clip_index,
                    track_index,
                    input_index,
                    stream: track.audio_order,
                    start: clip.in_point,
                    end: clip.in_point + clip.duration,
                    duration: clip.duration,
                    volume: track.volume,
                    fade_in: clip.fade_in,
                    fade_out: clip.fade_out,
                    delay_ms: delay_ms(clip.start_time),
                };

                let output = format!("mix_{}", mixes.len());
                mixes.push(MixNode {
                    accumulator: std::mem::replace(&mut accumulator, output.clone()),
                    branch: branch.delay_label(),
                    output,
                });
                branches.push(branch);
            }
        }

        Self {
            inputs,
            branches,
            mixes,
        }
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn branches(&self) -> &[AudioBranch] {
        &self.branches
    }

    pub fn mixes(&self) -> &[MixNode] {
        &self.mixes
    }

    /// Pad holding the fully folded mix before the stereo normalization.
    pub fn final_accumulator(&self) -> &str {
        self.mixes
            .last()
            .map(|m| m.output.as_str())
            .unwrap_or(SILENCE_LABEL)
    }

    /// Typed filter graph: per branch trim, delay and mix chains, then the
    /// terminating stereo normalization.
    pub fn to_filter_graph(&self) -> FilterGraph {
        let mut graph = FilterGraph::new();
        for (branch, mix) in self.branches.iter().zip(&self.mixes) {
            graph.push(branch.trim_chain());
            graph.push(branch.delay_chain());
            graph.push(mix.chain());
        }
        graph.push(
            FilterChain::new()
                .input(self.final_accumulator())
                .filter(Filter::new("aformat").arg("channel_layouts", "stereo"))
                .output(OUTPUT_LABEL),
        );
        graph
    }

    /// Script text handed to the encoder.
    pub fn render(&self) -> String {
        self.to_filter_graph().render()
    }

    /// Encoder input arguments: the silent bed for `total_duration` seconds,
    /// then one `-i` per unique source file.
    pub fn input_args(&self, total_duration: f64) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = [
            "-f".to_string(),
            "lavfi".to_string(),
            "-t".to_string(),
            total_duration.to_string(),
            "-i".to_string(),
            format!("anullsrc=channel_layout=stereo:sample_rate={MIX_SAMPLE_RATE}"),
        ]
        .into_iter()
        .map(Into::into)
        .collect();
        for path in &self.inputs {
            args.push("-i".into());
            args.push(path.as_os_str().to_owned());
        }
        args
    }
}

fn input_index_of(inputs: &[PathBuf], path: &Path) -> usize {
    inputs.iter().position(|p| p == path).map_or(0, |pos| pos + 1)
}

fn delay_ms(start_time: f64) -> u64 {
    let ms = (start_time * 1000.0).floor();
    if ms.is_finite() && ms > 0.0 {
        ms as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use montage_timeline_model::AudioTrack;

    fn two_clip_timeline() -> Vec<Clip> {
        vec![
            Clip::video("a", "/m/a.mp4", 0.0, 1.0, 4.0).with_audio_tracks(vec![
                AudioTrack::new(0),
                AudioTrack::new(1).disabled(),
                AudioTrack::new(2).with_volume(0.5),
            ]),
            Clip::audio("music", "/m/song.wav", 2.5, 0.0, 6.0).with_fades(1.0, 2.0),
            Clip::video("b", "/m/a.mp4", 4.0, 10.0, 3.0)
                .with_audio_tracks(vec![AudioTrack::new(0).disabled()]),
        ]
    }

    #[test]
    fn test_one_branch_and_mix_per_enabled_track() {
        let graph = AudioGraph::build(&two_clip_timeline());
        assert_eq!(graph.branches().len(), 3);
        assert_eq!(graph.mixes().len(), 3);
        // trim + delay + mix per branch, plus the final aformat
        assert_eq!(graph.to_filter_graph().len(), 3 * 3 + 1);
    }

    #[test]
    fn test_inputs_are_unique_in_first_appearance_order() {
        let graph = AudioGraph::build(&two_clip_timeline());
        assert_eq!(
            graph.inputs(),
            &[PathBuf::from("/m/a.mp4"), PathBuf::from("/m/song.wav")]
        );
        let music = &graph.branches()[2];
        assert_eq!(music.input_index, 2);
        assert_eq!(music.clip_index, 1);
        assert_eq!(music.delay_ms, 2500);
    }

    #[test]
    fn test_track_index_counts_enabled_tracks_only() {
        let graph = AudioGraph::build(&two_clip_timeline());
        let second = &graph.branches()[1];
        assert_eq!(second.track_index, 1);
        assert_eq!(second.stream, 2);
        assert_eq!(second.trim_label(), "clip0_t1");
    }

    #[test]
    fn test_mix_chain_folds_left_to_right_from_silence() {
        let graph = AudioGraph::build(&two_clip_timeline());
        let mixes = graph.mixes();
        assert_eq!(mixes[0].accumulator, "0:a");
        assert_eq!(mixes[1].accumulator, "mix_0");
        assert_eq!(mixes[2].accumulator, "mix_1");
        assert_eq!(mixes[2].branch, "delayed1_t0");
        assert_eq!(graph.final_accumulator(), "mix_2");
    }

    #[test]
    fn test_rendered_script() {
        let clips = vec![Clip::video("a", "a.mp4", 1.5, 2.0, 10.0).with_fades(2.0, 1.0)];
        let script = AudioGraph::build(&clips).render();
        assert_eq!(
            script,
            "[1:a:0]atrim=start=2:end=12,asetpts=PTS-STARTPTS,volume=1,aresample=48000:async=1,\
             afade=t=in:ss=0:d=2,afade=t=out:st=9:d=1[clip0_t0];\
             [clip0_t0]adelay=1500|1500[delayed0_t0];\
             [0:a][delayed0_t0]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[mix_0];\
             [mix_0]aformat=channel_layouts=stereo[aout]"
        );
    }

    #[test]
    fn test_no_enabled_tracks_is_silence_only() {
        let clips = vec![Clip::video("a", "a.mp4", 0.0, 0.0, 2.0)
            .with_audio_tracks(vec![AudioTrack::new(0).disabled()])];
        let graph = AudioGraph::build(&clips);
        assert!(graph.branches().is_empty());
        assert_eq!(graph.render(), "[0:a]aformat=channel_layouts=stereo[aout]");
        // the file is still an input so indices stay stable
        assert_eq!(graph.inputs().len(), 1);
    }

    #[test]
    fn test_input_args() {
        let graph = AudioGraph::build(&two_clip_timeline());
        let args: Vec<String> = graph
            .input_args(12.5)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-f",
                "lavfi",
                "-t",
                "12.5",
                "-i",
                "anullsrc=channel_layout=stereo:sample_rate=48000",
                "-i",
                "/m/a.mp4",
                "-i",
                "/m/song.wav",
            ]
        );
    }

    #[test]
    fn test_branch_fades_follow_clip_bounds() {
        let clips = vec![Clip::audio("a", "a.wav", 0.0, 0.0, 10.0)
            .with_fades(2.0, 1.0)
            .with_audio_tracks(vec![AudioTrack::new(0).with_volume(0.8)])];
        let graph = AudioGraph::build(&clips);
        assert_eq!(
            graph.branches()[0].trim_chain().to_string(),
            "[1:a:0]atrim=start=0:end=10,asetpts=PTS-STARTPTS,volume=0.8,\
             aresample=48000:async=1,afade=t=in:ss=0:d=2,afade=t=out:st=9:d=1[clip0_t0]"
        );

        let unfaded = AudioGraph::build(&[Clip::audio("b", "b.wav", 0.0, 0.0, 4.0)]);
        assert!(!unfaded.render().contains("afade"));
    }
}
