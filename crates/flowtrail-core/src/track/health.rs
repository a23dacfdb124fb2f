use nalgebra::Vector2;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ForwardBackwardMetrics {
    /// Distance travelled by the forward estimate (pixels).
    pub displacement: f32,
    /// Distance between the origin and the back-tracked estimate, `None` when
    /// the backward pass lost the point.
    pub backward_error: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackHealth {
    pub valid: bool,
    pub metrics: ForwardBackwardMetrics,
}

impl TrackHealth {
    /// Round-trip consistency of one flow estimate.
    ///
    /// `backward` is the point tracked from `forward` back into the original
    /// frame. A lost backward pass is never healthy.
    pub fn evaluate(
        origin: Vector2<f32>,
        forward: Vector2<f32>,
        backward: Option<Vector2<f32>>,
        max_backward: f32,
    ) -> Self {
        let displacement = (forward - origin).norm();
        let backward_error = backward.map(|b| (b - origin).norm());
        let valid = backward_error.map_or(false, |err| err <= max_backward);
        Self {
            valid,
            metrics: ForwardBackwardMetrics {
                displacement,
                backward_error,
            },
        }
    }
}
