use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align4, Deserialize, LEN_TYPE_SIZE, LenType};

/// Frames longer than this are treated as a corrupted stream.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// The receiving end of a framed connection.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Reads the next frame into `buf` and decodes it.
    ///
    /// The buffer is reused between calls and is made of `B` so the payload
    /// keeps the alignment needed to view it as `f32` in place.
    ///
    /// # Arguments
    /// * `buf` - The frame storage, the returned `T` may borrow from it.
    ///
    /// # Errors
    /// If the stream ends, the frame is larger than `MAX_FRAME_LEN` or it
    /// doesn't decode as a `T`.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        let mut len_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut len_buf).await?;

        let len = usize::try_from(LenType::from_be_bytes(len_buf))
            .ok()
            .filter(|&len| len <= MAX_FRAME_LEN)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "frame too large"))?;

        buf.clear();
        buf.resize(len.div_ceil(size_of::<B>()), B::zeroed());

        let frame = &mut bytemuck::cast_slice_mut::<B, u8>(buf)[..len];
        self.rx.read_exact(frame).await?;

        T::deserialize(frame)
    }
}
