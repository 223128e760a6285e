use crate::nn::Parameter;

/// Clamps every gradient element of every parameter into `[-clip, clip]`.
pub fn clip_grad_value(params: &mut [&mut Parameter], clip: f64) {
    for p in params.iter_mut() {
        p.grad.clamp_in_place(-clip, clip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Matrix;

    #[test]
    fn values_outside_range_are_clamped_exactly() {
        let mut p = Parameter::new("w", Matrix::zeros(1, 4));
        p.grad = Matrix::from_rows(&[vec![5.0, -7.5, 0.3, -1.0]]);
        clip_grad_value(&mut [&mut p], 1.0);
        assert_eq!(p.grad.as_slice(), &[1.0, -1.0, 0.3, -1.0]);
    }
}
