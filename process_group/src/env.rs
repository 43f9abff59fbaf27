use std::{env, str::FromStr};

use crate::{GroupErr, Result};

const DEFAULT_MASTER_ADDR: &str = "127.0.0.1";
const DEFAULT_MASTER_PORT: u16 = 29500;

/// The identity handed to this process by the external multi-process launcher.
///
/// Follows the usual distributed launch convention: `RANK`, `WORLD_SIZE`,
/// `LOCAL_RANK`, `MASTER_ADDR` and `MASTER_PORT`. A process started without a
/// launcher is a group of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchEnv {
    pub rank: usize,
    pub world_size: usize,
    pub local_rank: usize,
    pub master_addr: String,
    pub master_port: u16,
}

impl LaunchEnv {
    /// Reads the launch environment of the current process.
    ///
    /// # Errors
    /// Returns `GroupErr::InvalidEnv` if a variable is present but malformed and
    /// `GroupErr::InvalidRank` if the rank does not fit in the world.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Builds the launch environment out of an arbitrary variable lookup.
    ///
    /// # Args
    /// * `lookup` - Returns the value of a variable, if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rank = parse_var(&lookup, "RANK")?.unwrap_or(0);
        let world_size = parse_var(&lookup, "WORLD_SIZE")?.unwrap_or(1);
        let local_rank = parse_var(&lookup, "LOCAL_RANK")?.unwrap_or(rank);
        let master_port = parse_var(&lookup, "MASTER_PORT")?.unwrap_or(DEFAULT_MASTER_PORT);
        let master_addr =
            lookup("MASTER_ADDR").unwrap_or_else(|| DEFAULT_MASTER_ADDR.to_string());

        if world_size == 0 {
            return Err(GroupErr::InvalidEnv {
                var: "WORLD_SIZE",
                value: world_size.to_string(),
            });
        }

        if rank >= world_size {
            return Err(GroupErr::InvalidRank { rank, world_size });
        }

        Ok(Self {
            rank,
            world_size,
            local_rank,
            master_addr,
            master_port,
        })
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };

    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| GroupErr::InvalidEnv { var, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |var| vars.get(var).cloned()
    }

    #[test]
    fn defaults_to_a_group_of_one() {
        let env = LaunchEnv::from_lookup(lookup(&[])).unwrap();
        assert_eq!(env.rank, 0);
        assert_eq!(env.world_size, 1);
        assert_eq!(env.local_rank, 0);
        assert_eq!(env.master_addr, "127.0.0.1");
        assert_eq!(env.master_port, 29500);
    }

    #[test]
    fn local_rank_falls_back_to_rank() {
        let env = LaunchEnv::from_lookup(lookup(&[("RANK", "3"), ("WORLD_SIZE", "4")])).unwrap();
        assert_eq!(env.local_rank, 3);

        let env = LaunchEnv::from_lookup(lookup(&[
            ("RANK", "3"),
            ("WORLD_SIZE", "4"),
            ("LOCAL_RANK", "1"),
            ("MASTER_PORT", "1234"),
        ]))
        .unwrap();
        assert_eq!(env.local_rank, 1);
        assert_eq!(env.master_port, 1234);
    }

    #[test]
    fn malformed_values_are_fatal() {
        let err = LaunchEnv::from_lookup(lookup(&[("WORLD_SIZE", "four")])).unwrap_err();
        assert!(matches!(err, GroupErr::InvalidEnv { var: "WORLD_SIZE", .. }));

        let err = LaunchEnv::from_lookup(lookup(&[("WORLD_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, GroupErr::InvalidEnv { var: "WORLD_SIZE", .. }));
    }

    #[test]
    fn rank_must_fit_in_the_world() {
        let err = LaunchEnv::from_lookup(lookup(&[("RANK", "2"), ("WORLD_SIZE", "2")])).unwrap_err();
        assert!(matches!(
            err,
            GroupErr::InvalidRank {
                rank: 2,
                world_size: 2
            }
        ));
    }
}
