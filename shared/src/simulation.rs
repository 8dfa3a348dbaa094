//! Deterministic lockstep simulation
//!
//! The engine advances only when the scheduler releases a tick, and only
//! with integer arithmetic, so both peers fed the same command stream hold
//! bit-identical state. Network input never moves a player directly: it
//! sets a destination that the engine then integrates toward.

use crate::fixed::{distance, polar_to_cartesian, to_fixed, wrap_degrees};
use crate::protocol::Command;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

pub const WORLD_WIDTH: i32 = to_fixed(640);
pub const WORLD_HEIGHT: i32 = to_fixed(480);

/// Fixed-point units a player covers per tick
pub const PLAYER_SPEED: i32 = 4000;
pub const PLAYER_RADIUS: i32 = to_fixed(15);
pub const PROJECTILE_SPEED: i32 = 6000;
pub const PROJECTILE_RADIUS: i32 = to_fixed(4);
/// Degrees every player's facing turns per tick
pub const ROTATION_PER_TICK: i32 = 3;
pub const SHOOT_COOLDOWN_TICKS: u32 = 60;

/// Distance between centers below which a projectile hits a player
pub const HIT_RADIUS: i32 = PLAYER_RADIUS + PROJECTILE_RADIUS;

pub const PLAYER_ONE_SPAWN: (i32, i32) = (to_fixed(100), to_fixed(240));
pub const PLAYER_TWO_SPAWN: (i32, i32) = (to_fixed(540), to_fixed(240));

/// Extra clearance between a shooter and its fresh projectile
const MUZZLE_CLEARANCE: i32 = to_fixed(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: u8,
    pub x: i32,
    pub y: i32,
    pub dest_x: i32,
    pub dest_y: i32,
    /// Facing in whole degrees, always within [0, 360)
    pub angle: i32,
    pub alive: bool,
    pub last_action_tick: Option<u32>,
}

impl Player {
    pub fn new(id: u8, x: i32, y: i32) -> Self {
        Self {
            id,
            x,
            y,
            dest_x: x,
            dest_y: y,
            angle: 0,
            alive: true,
            last_action_tick: None,
        }
    }

    pub fn can_shoot(&self, tick: u32) -> bool {
        match self.last_action_tick {
            Some(last) => tick.saturating_sub(last) >= SHOOT_COOLDOWN_TICKS,
            None => true,
        }
    }

    pub fn is_at_destination(&self) -> bool {
        self.x == self.dest_x && self.y == self.dest_y
    }

    /// Moves one tick toward the destination, snapping on arrival
    fn integrate(&mut self) {
        let dx = (self.dest_x - self.x) as i64;
        let dy = (self.dest_y - self.y) as i64;
        let dist = distance(dx, dy);

        if dist < PLAYER_SPEED as i64 {
            self.x = self.dest_x;
            self.y = self.dest_y;
            return;
        }

        // Multiply first: dx / dist alone truncates to zero
        self.x += (dx * PLAYER_SPEED as i64 / dist) as i32;
        self.y += (dy * PLAYER_SPEED as i64 / dist) as i32;
    }
}

/// Simulation-local bullet; never sent over the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projectile {
    pub x: i32,
    pub y: i32,
    pub dx: i32,
    pub dy: i32,
}

impl Projectile {
    /// Advances one tick and reflects off the playfield edges
    fn integrate(&mut self) {
        self.x += self.dx;
        self.y += self.dy;

        if self.x < 0 {
            self.x = 0;
            self.dx = -self.dx;
        } else if self.x > WORLD_WIDTH {
            self.x = WORLD_WIDTH;
            self.dx = -self.dx;
        }

        if self.y < 0 {
            self.y = 0;
            self.dy = -self.dy;
        } else if self.y > WORLD_HEIGHT {
            self.y = WORLD_HEIGHT;
            self.dy = -self.dy;
        }
    }

    fn hits(&self, player: &Player) -> bool {
        let dx = (player.x - self.x) as i64;
        let dy = (player.y - self.y) as i64;
        let reach = HIT_RADIUS as i64;
        dx * dx + dy * dy < reach * reach
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Running,
    /// `winner` is `None` when both players died on the same tick
    Finished { winner: Option<u8> },
}

/// Read-only snapshot handed to the renderer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderView {
    pub tick: u32,
    pub players: Vec<Player>,
    pub projectiles: Vec<Projectile>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simulation {
    tick: u32,
    players: Vec<Player>,
    projectiles: Vec<Projectile>,
    outcome: Outcome,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    /// Two players at their spawn points, tick 0
    pub fn new() -> Self {
        Self::with_players(vec![
            Player::new(1, PLAYER_ONE_SPAWN.0, PLAYER_ONE_SPAWN.1),
            Player::new(2, PLAYER_TWO_SPAWN.0, PLAYER_TWO_SPAWN.1),
        ])
    }

    pub fn with_players(mut players: Vec<Player>) -> Self {
        players.sort_by_key(|p| p.id);
        Self {
            tick: 0,
            players,
            projectiles: Vec::new(),
            outcome: Outcome::Running,
        }
    }

    /// The next tick [`Simulation::step`] will execute
    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, id: u8) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.outcome, Outcome::Finished { .. })
    }

    /// Spawns a projectile directly; used by scenario setups
    pub fn add_projectile(&mut self, projectile: Projectile) {
        self.projectiles.push(projectile);
    }

    /// Executes the current tick with the commands released for it
    ///
    /// Commands are applied in issuer order regardless of the order given,
    /// and those addressed to another tick are ignored. Once the match is
    /// finished this does nothing.
    pub fn step(&mut self, commands: &[Command]) -> Outcome {
        if self.is_finished() {
            return self.outcome;
        }

        for player in &mut self.players {
            player.angle = wrap_degrees(player.angle + ROTATION_PER_TICK);
        }

        let mut ordered: Vec<&Command> = commands.iter().collect();
        ordered.sort_by_key(|c| c.issuer);
        for command in ordered {
            if command.execution_tick != self.tick {
                warn!(
                    "Ignoring command for tick {} while executing tick {}",
                    command.execution_tick, self.tick
                );
                continue;
            }
            self.apply(command);
        }

        for player in &mut self.players {
            player.integrate();
        }

        self.integrate_projectiles();

        self.tick += 1;
        self.outcome
    }

    fn apply(&mut self, command: &Command) {
        let tick = self.tick;
        let Some(player) = self.players.iter_mut().find(|p| p.id == command.issuer) else {
            warn!("Command from unknown issuer {}", command.issuer);
            return;
        };

        if command.wants_move() {
            player.dest_x = command.dest_x.clamp(0, WORLD_WIDTH);
            player.dest_y = command.dest_y.clamp(0, WORLD_HEIGHT);
        }

        if command.wants_shoot() {
            if !player.can_shoot(tick) {
                debug!("Player {} shot on cooldown at tick {}", player.id, tick);
                return;
            }

            let (ox, oy) = polar_to_cartesian(HIT_RADIUS + MUZZLE_CLEARANCE, player.angle);
            let (dx, dy) = polar_to_cartesian(PROJECTILE_SPEED, player.angle);
            player.last_action_tick = Some(tick);
            let projectile = Projectile {
                x: player.x + ox,
                y: player.y + oy,
                dx,
                dy,
            };
            self.projectiles.push(projectile);
        }
    }

    fn integrate_projectiles(&mut self) {
        let players = &mut self.players;
        self.projectiles.retain_mut(|projectile| {
            projectile.integrate();

            let mut hit = false;
            for player in players.iter_mut().filter(|p| p.alive) {
                if projectile.hits(player) {
                    player.alive = false;
                    hit = true;
                }
            }
            !hit
        });

        let survivors: Vec<u8> = self
            .players
            .iter()
            .filter(|p| p.alive)
            .map(|p| p.id)
            .collect();

        if survivors.len() < self.players.len() {
            let winner = match survivors.as_slice() {
                [only] => Some(*only),
                _ => None,
            };
            info!("Game over at tick {}: winner {:?}", self.tick, winner);
            self.outcome = Outcome::Finished { winner };
        }
    }

    pub fn view(&self) -> RenderView {
        RenderView {
            tick: self.tick,
            players: self.players.clone(),
            projectiles: self.projectiles.clone(),
            outcome: self.outcome,
        }
    }

    /// FNV-1a hash over the complete simulation state
    pub fn checksum(&self) -> u64 {
        let mut hasher = Fnv1a::new();
        hasher.write_u32(self.tick);
        for p in &self.players {
            hasher.write_u32(p.id as u32);
            for v in [p.x, p.y, p.dest_x, p.dest_y, p.angle] {
                hasher.write_u32(v as u32);
            }
            hasher.write_u32(p.alive as u32);
            hasher.write_u32(p.last_action_tick.map_or(u32::MAX, |t| t));
        }
        for b in &self.projectiles {
            for v in [b.x, b.y, b.dx, b.dy] {
                hasher.write_u32(v as u32);
            }
        }
        hasher.finish()
    }
}

struct Fnv1a(u64);

impl Fnv1a {
    fn new() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }

    fn write_u32(&mut self, value: u32) {
        for byte in value.to_le_bytes() {
            self.0 ^= byte as u64;
            self.0 = self.0.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}
