//! C6: per-port-type accumulation into a sink buffer, grounded on the
//! teacher's audio summing task (accumulate source buffers into one
//! output) generalized to ramped audio, CV, and atom-sequence merge,
//! per spec §4.6.

use synthpod_plugin_api::atom::{SequenceReader, SequenceWriter};
use synthpod_plugin_api::Urid;

use crate::module::ModuleManager;
use crate::port::{PortAddr, RampState, Source};

/// Accumulates `nsamples` of audio from every source in `sources` into
/// `out`, applying each source's ramp scalar per-sample and advancing
/// the ramp (§4.6 "Audio").
///
/// `read_source` resolves a `PortAddr` to its live output buffer; the
/// caller supplies it because port buffers live inside the module
/// vector the multiplexer does not itself own a borrow of.
pub fn multiplex_audio(
    out: &mut [f32],
    sources: &mut [Source],
    nsamples: u32,
    ramp_samples: u32,
    mut read_source: impl FnMut(PortAddr) -> Option<*const f32>,
) {
    out.iter_mut().for_each(|s| *s = 0.0);

    for source in sources.iter_mut() {
        let ptr = match read_source(source.port) {
            Some(p) => p,
            None => continue,
        };
        // SAFETY: `read_source` returns a pointer into a buffer sized
        // for at least `nsamples` floats, owned by a different module
        // than `out` (the graph has no self-loops); the audio thread
        // is the sole mutator of all port buffers for this period.
        let input = unsafe { std::slice::from_raw_parts(ptr, nsamples as usize) };

        if source.ramp == RampState::None {
            for (o, i) in out.iter_mut().zip(input.iter()) {
                *o += *i;
            }
        } else {
            for (o, i) in out.iter_mut().zip(input.iter()) {
                source.advance(1, ramp_samples);
                *o += *i * source.scalar;
            }
        }
    }
}

/// Same accumulation as `multiplex_audio` but without ramps (§4.6
/// "CV").
pub fn multiplex_cv(
    out: &mut [f32],
    sources: &[Source],
    nsamples: u32,
    mut read_source: impl FnMut(PortAddr) -> Option<*const f32>,
) {
    out.iter_mut().for_each(|s| *s = 0.0);
    for source in sources {
        let ptr = match read_source(source.port) {
            Some(p) => p,
            None => continue,
        };
        let input = unsafe { std::slice::from_raw_parts(ptr, nsamples as usize) };
        for (o, i) in out.iter_mut().zip(input.iter()) {
            *o += *i;
        }
    }
}

/// Merge-sorts every source sequence into `sink` by non-decreasing
/// frame-time, preserving per-source order on ties (§4.6 "Atom
/// sequence", §8 invariant 6). Returns the number of events dropped to
/// capacity overflow, mirroring `SequenceWriter::overflow_count`.
pub fn multiplex_atom_sequence<'a>(
    sink: &mut [u8],
    sequence_urid: Urid,
    sources: impl Iterator<Item = &'a [u8]>,
) -> u64 {
    let mut readers: Vec<_> = sources.filter_map(SequenceReader::new).collect();
    let mut cursors: Vec<Option<(i64, Urid, &[u8])>> =
        readers.iter_mut().map(|r| r.next()).collect();

    let mut writer = SequenceWriter::new(sink, sequence_urid);

    loop {
        let mut best: Option<(usize, i64)> = None;
        for (i, cur) in cursors.iter().enumerate() {
            if let Some((frames, _, _)) = cur {
                match best {
                    Some((_, best_frames)) if *frames >= best_frames => {}
                    _ => best = Some((i, *frames)),
                }
            }
        }

        let Some((i, _)) = best else { break };
        let (frames, atom_type, body) = cursors[i].take().unwrap();
        writer.push_event(frames, atom_type, body);
        cursors[i] = readers[i].next();
    }

    writer.overflow_count
}

/// §8 invariant 3/9 helper: decrements a module's scheduler `count`
/// after a predecessor finishes, used identically by the sequential
/// and parallel schedulers.
pub fn notify_predecessor_done(modules: &mut ModuleManager, successor: crate::module::ModuleId) {
    if let Some(m) = modules.get_mut(successor) {
        m.dag.count = m.dag.count.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleId;
    use crate::port::PortIndex;

    fn addr(m: u32, p: u32) -> PortAddr {
        PortAddr {
            module: ModuleId(m),
            index: PortIndex(p),
        }
    }

    #[test]
    fn audio_merge_sums_constants() {
        let a = vec![0.5f32; 64];
        let b = vec![0.25f32; 64];
        let mut sources = vec![
            Source {
                port: addr(1, 0),
                ramp: RampState::None,
                remaining: 0,
                scalar: 1.0,
            },
            Source {
                port: addr(2, 0),
                ramp: RampState::None,
                remaining: 0,
                scalar: 1.0,
            },
        ];
        let mut out = vec![0.0f32; 64];
        multiplex_audio(&mut out, &mut sources, 64, 64, |addr| {
            if addr.module == ModuleId(1) {
                Some(a.as_ptr())
            } else {
                Some(b.as_ptr())
            }
        });
        for sample in out {
            assert!((sample - 0.75).abs() < 1e-6);
        }
    }

    #[test]
    fn passthrough_copies_ramp() {
        let ramp: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let mut sources = vec![Source {
            port: addr(1, 0),
            ramp: RampState::None,
            remaining: 0,
            scalar: 1.0,
        }];
        let mut out = vec![0.0f32; 64];
        multiplex_audio(&mut out, &mut sources, 64, 64, |_| Some(ramp.as_ptr()));
        assert_eq!(out, ramp);
    }
}
