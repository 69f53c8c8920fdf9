/// Element types a receive buffer can be made of.
///
/// Frames are read into a `Vec<B>` and then viewed as bytes, the `f32` payload
/// starts 4 bytes into the frame so `B` must keep at least 4 byte alignment.
pub trait Align4: bytemuck::Pod {}

macro_rules! impl_align4 {
    ($($ty:ty),*) => {
        $(impl Align4 for $ty {})*
    };
}

impl_align4!(u32, i32, u64, i64, f32, f64);
