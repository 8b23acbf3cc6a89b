use std::sync::atomic::{AtomicU32, Ordering};

/// Lock-free single-producer single-consumer ring buffer for f32 samples.
///
/// Samples are stored as raw bits in atomics so the producer (decode thread)
/// and consumer (cpal callback or analyser) never need a lock. Capacity is
/// rounded up to a power of two.
pub struct RingBuffer {
    data: Box<[AtomicU32]>,
    mask: u32,
    write_pos: AtomicU32,
    read_pos: AtomicU32,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let data: Vec<AtomicU32> = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        Self {
            data: data.into_boxed_slice(),
            mask: (capacity - 1) as u32,
            write_pos: AtomicU32::new(0),
            read_pos: AtomicU32::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Push as many samples as fit. Returns how many were written.
    pub fn push(&self, samples: &[f32]) -> usize {
        let wp = self.write_pos.load(Ordering::Relaxed);
        let rp = self.read_pos.load(Ordering::Acquire);
        let used = wp.wrapping_sub(rp) as usize;
        let free = self.capacity().saturating_sub(used);
        let n = samples.len().min(free);
        for (i, &sample) in samples[..n].iter().enumerate() {
            let idx = (wp.wrapping_add(i as u32) & self.mask) as usize;
            self.data[idx].store(sample.to_bits(), Ordering::Relaxed);
        }
        self.write_pos
            .store(wp.wrapping_add(n as u32), Ordering::Release);
        n
    }

    /// Push samples, overwriting the oldest unread ones when full.
    /// Used for analyser taps where only the most recent window matters.
    pub fn push_overwrite(&self, samples: &[f32]) {
        let cap = self.capacity();
        let samples = if samples.len() > cap {
            &samples[samples.len() - cap..]
        } else {
            samples
        };
        let wp = self.write_pos.load(Ordering::Relaxed);
        for (i, &sample) in samples.iter().enumerate() {
            let idx = (wp.wrapping_add(i as u32) & self.mask) as usize;
            self.data[idx].store(sample.to_bits(), Ordering::Relaxed);
        }
        let new_wp = wp.wrapping_add(samples.len() as u32);
        self.write_pos.store(new_wp, Ordering::Release);

        // Drag the reader forward if we lapped it
        let rp = self.read_pos.load(Ordering::Acquire);
        if new_wp.wrapping_sub(rp) as usize > cap {
            let _ = self.read_pos.compare_exchange(
                rp,
                new_wp.wrapping_sub(cap as u32),
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        }
    }

    /// Read available samples into dst. Returns number of samples read.
    pub fn read(&self, dst: &mut [f32]) -> usize {
        let wp = self.write_pos.load(Ordering::Acquire);
        let rp = self.read_pos.load(Ordering::Relaxed);
        let available = (wp.wrapping_sub(rp) as usize).min(self.capacity());
        let to_read = available.min(dst.len());

        for (i, out) in dst[..to_read].iter_mut().enumerate() {
            let idx = (rp.wrapping_add(i as u32) & self.mask) as usize;
            *out = f32::from_bits(self.data[idx].load(Ordering::Relaxed));
        }

        self.read_pos
            .store(rp.wrapping_add(to_read as u32), Ordering::Release);
        to_read
    }

    /// Number of samples available to read.
    pub fn available(&self) -> usize {
        let wp = self.write_pos.load(Ordering::Acquire);
        let rp = self.read_pos.load(Ordering::Relaxed);
        (wp.wrapping_sub(rp) as usize).min(self.capacity())
    }

    /// Drop everything unread.
    pub fn clear(&self) {
        let wp = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(wp, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_rounds_to_power_of_two() {
        assert_eq!(RingBuffer::new(1000).capacity(), 1024);
        assert_eq!(RingBuffer::new(0).capacity(), 2);
    }

    #[test]
    fn push_then_read_preserves_order() {
        let ring = RingBuffer::new(8);
        assert_eq!(ring.push(&[1.0, 2.0, 3.0]), 3);
        let mut out = [0.0; 4];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(&out[..3], &[1.0, 2.0, 3.0]);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn push_stops_when_full() {
        let ring = RingBuffer::new(4);
        assert_eq!(ring.push(&[1.0; 6]), 4);
        assert_eq!(ring.available(), 4);
    }

    #[test]
    fn overwrite_keeps_latest_window() {
        let ring = RingBuffer::new(4);
        ring.push_overwrite(&[1.0, 2.0, 3.0]);
        ring.push_overwrite(&[4.0, 5.0, 6.0]);
        let mut out = [0.0; 4];
        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn wraps_around() {
        let ring = RingBuffer::new(4);
        let mut out = [0.0; 3];
        ring.push(&[1.0, 2.0, 3.0]);
        ring.read(&mut out);
        ring.push(&[4.0, 5.0, 6.0]);
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(out, [4.0, 5.0, 6.0]);
    }

    #[test]
    fn clear_drops_unread() {
        let ring = RingBuffer::new(8);
        ring.push(&[1.0, 2.0]);
        ring.clear();
        assert_eq!(ring.available(), 0);
    }
}
