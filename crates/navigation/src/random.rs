// Random number source for the sampling queries

use rand::Rng;

/// Uniform floats in [0, 1)
pub trait RandomSource {
    fn frand(&mut self) -> f32;
}

impl<R: Rng + ?Sized> RandomSource for R {
    fn frand(&mut self) -> f32 {
        self.r#gen::<f32>()
    }
}
