//! CPU particle simulation shared with an update thread.

use std::sync::Arc;

use glam::{Vec3, Vec4};
use parking_lot::Mutex;

use crate::pipeline::uniforms::GpuParticle;

/// A single simulated particle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub position: Vec3,
    pub velocity: Vec3,
    pub size: f32,
    pub color: Vec4,
    /// Seconds left to live
    pub life: f32,
}

/// Particle emitter state
#[derive(Debug, Clone, Default)]
pub struct ParticleSystem {
    pub particles: Vec<Particle>,
    pub gravity: Vec3,
}

impl ParticleSystem {
    pub fn new(gravity: Vec3) -> Self {
        Self {
            particles: Vec::new(),
            gravity,
        }
    }

    pub fn spawn(&mut self, particle: Particle) {
        self.particles.push(particle);
    }

    /// Integrate and drop dead particles.
    pub fn step(&mut self, dt: f32) {
        let gravity = self.gravity;
        for particle in &mut self.particles {
            particle.velocity += gravity * dt;
            particle.position += particle.velocity * dt;
            particle.life -= dt;
        }
        self.particles.retain(|p| p.life > 0.0);
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}

/// A particle system mutated by a simulation thread; the renderer only holds
/// the lock while copying.
pub type SharedParticles = Arc<Mutex<ParticleSystem>>;

/// Particles copied out for one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleBatch {
    pub particles: Vec<GpuParticle>,
    /// Particles dropped because the per-frame limit was reached
    pub dropped: usize,
}

impl ParticleBatch {
    /// Copy up to `limit` particles from every system.
    pub fn gather(systems: &[SharedParticles], limit: usize) -> Self {
        let mut batch = ParticleBatch::default();
        for system in systems {
            let system = system.lock();
            for particle in &system.particles {
                if batch.particles.len() == limit {
                    batch.dropped += 1;
                    continue;
                }
                batch.particles.push(GpuParticle {
                    position_size: particle.position.extend(particle.size),
                    color: particle.color,
                });
            }
        }
        if batch.dropped > 0 {
            log::warn!("Particle limit {} reached, {} particles skipped", limit, batch.dropped);
        }
        batch
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particle(life: f32) -> Particle {
        Particle {
            position: Vec3::ZERO,
            velocity: Vec3::X,
            size: 0.5,
            color: Vec4::ONE,
            life,
        }
    }

    #[test]
    fn test_step_integrates_and_expires() {
        let mut system = ParticleSystem::new(Vec3::new(0.0, -10.0, 0.0));
        system.spawn(particle(1.0));
        system.spawn(particle(0.05));
        system.step(0.1);
        assert_eq!(system.len(), 1);
        let p = system.particles[0];
        assert!((p.position.x - 0.1).abs() < 1e-6);
        assert!(p.velocity.y < 0.0);
    }

    #[test]
    fn test_gather_respects_limit() {
        let shared: SharedParticles = Arc::new(Mutex::new(ParticleSystem::default()));
        for _ in 0..5 {
            shared.lock().spawn(particle(1.0));
        }
        let batch = ParticleBatch::gather(&[shared.clone(), shared], 8);
        assert_eq!(batch.particles.len(), 8);
        assert_eq!(batch.dropped, 2);
        assert_eq!(batch.particles[0].position_size.w, 0.5);
    }
}
