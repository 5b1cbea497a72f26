pub mod curve;
pub mod document;
pub mod geometry;
pub mod tolerance;

pub mod algorithms {
    pub mod area;
    pub mod containment;
    pub mod intersect;
    pub mod points;
    pub mod region;
    pub mod simplify;
}
