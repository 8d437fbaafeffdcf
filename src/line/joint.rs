//! Host-side mirror of the joint geometry the line shader evaluates per
//! fragment. Used to size instance quads and to check the shader's math.
use glam::Vec2;

use super::LineJoin;

/// Below this length the sum of two unit directions is treated as a
/// reversal and the miter vector falls back to their difference.
const REVERSAL_EPSILON: f32 = 1e-3;

/// Converts a miter limit given as the smallest inner angle (radians) that
/// still gets a sharp miter into the threshold compared against
/// [`Joint::cos_half`].
pub fn miter_limit_threshold(angle: f32) -> f32 {
    (angle * 0.5).sin()
}

/// Geometry of the joint between an incoming and an outgoing segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Joint {
    /// Unit vector bisecting the turn. Its plane through the joint point splits
    /// the joint region between the two segments.
    pub miter_vector: Vec2,
    /// `miter_vector` rotated by 90 degrees; the direction of the sharp tip.
    pub miter_normal: Vec2,
    /// Cosine of half the turn angle. 1 for a straight continuation.
    pub cos_half: f32,
    /// Side of the turn: positive for a left (counter-clockwise) turn.
    pub turn: f32,
    /// Whether the joint is cut off instead of drawn as a sharp miter.
    pub truncated: bool,
}

impl Joint {
    pub fn new(incoming: Vec2, outgoing: Vec2, style: LineJoin, threshold: f32) -> Self {
        let t0 = incoming.normalize_or_zero();
        let t1 = outgoing.normalize_or_zero();
        let sum = t0 + t1;
        let miter_vector = if sum.length() > REVERSAL_EPSILON {
            sum.normalize()
        } else {
            let diff = (t1 - t0).normalize_or_zero();
            if diff == Vec2::ZERO { t1 } else { diff }
        };
        let cos_half = ((1.0 + t0.dot(t1)) * 0.5).max(0.0).sqrt();
        Self {
            miter_vector,
            miter_normal: miter_vector.perp(),
            cos_half,
            turn: t0.perp_dot(t1).signum(),
            truncated: style != LineJoin::Miter || cos_half < threshold,
        }
    }

    /// Normal of the outer edge of the turn, pointing away from the joint.
    pub fn outer_normal(&self) -> Vec2 {
        -self.turn * self.miter_normal
    }

    /// How far past the joint point the wider side of a segment reaches along
    /// its own direction.
    pub fn extension(&self, halfwidth: f32) -> f32 {
        if self.truncated {
            return halfwidth;
        }
        let c = self.cos_half.max(REVERSAL_EPSILON);
        halfwidth * (1.0 - c * c).max(0.0).sqrt() / c
    }

    /// Signed distance of `rel` (relative to the joint point) from the bevel
    /// edge. Negative inside.
    pub fn bevel_sdf(&self, rel: Vec2, halfwidth: f32) -> f32 {
        rel.dot(self.outer_normal()) - halfwidth * self.cos_half
    }

    /// Whether a fragment at `rel` belongs to the incoming segment rather than
    /// the outgoing one.
    pub fn owned_by_incoming(&self, rel: Vec2) -> bool {
        rel.dot(self.miter_vector) <= 0.0
    }
}
