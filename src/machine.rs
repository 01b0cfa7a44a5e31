use crate::settings::Settings;
use crate::types::{QueueName, WorkerNumber, CRON_QUEUE_NAME};

/// Describes which `(queue, worker#)` pairs a host should run, and whether
/// it should run/configure the cron scheduler.
///
/// `worker_names` takes `settings` explicitly (rather than each
/// implementation holding its own reference) since it must be called only
/// after every queue-contributing task/cron-config has registered itself -
/// the call itself freezes the implied-queue set via
/// [`Settings::get_queue_counts`].
pub trait Machine: Send + Sync {
    fn run_cron(&self) -> bool;
    fn configure_cron(&self) -> bool;
    fn worker_names(&self, settings: &Settings) -> Vec<(QueueName, WorkerNumber)>;
}

/// A machine that behaves as part of a pool: it's told its position and
/// the pool size, and works out which queues to run via round-robin
/// assignment over every registered queue's workers.
pub struct PooledMachine {
    machine_number: u32,
    machine_count: u32,
    only_queue: Option<QueueName>,
}

impl PooledMachine {
    pub fn new(machine_number: u32, machine_count: u32, only_queue: Option<QueueName>) -> Self {
        PooledMachine {
            machine_number,
            machine_count,
            only_queue,
        }
    }
}

impl Machine for PooledMachine {
    fn run_cron(&self) -> bool {
        self.machine_number == 1
            && match &self.only_queue {
                None => true,
                Some(q) => q.as_str() == CRON_QUEUE_NAME,
            }
    }

    fn configure_cron(&self) -> bool {
        true
    }

    /// Round-robin assignment over every registered queue's workers: the
    /// `job_number`-th worker across all queues (sorted by name) lands on
    /// machine `(job_number % machine_count) + 1`.
    fn worker_names(&self, settings: &Settings) -> Vec<(QueueName, WorkerNumber)> {
        let counts = settings.get_queue_counts();
        let mut queues: Vec<&QueueName> = counts.keys().collect();
        queues.sort();

        let mut worker_names = Vec::new();
        let mut pair_index: u32 = 0;

        for queue in queues {
            if let Some(only) = &self.only_queue {
                if only != queue {
                    continue;
                }
            }

            let count = counts[queue];
            for worker_num in 1..=count {
                if (pair_index % self.machine_count) + 1 == self.machine_number {
                    worker_names.push((queue.clone(), WorkerNumber(worker_num)));
                }
                pair_index += 1;
            }
        }

        worker_names
    }
}

/// A machine configured explicitly by an extra-settings file: runs every
/// registered queue's workers, and never runs the cron scheduler itself
/// (the configuration that produced it is assumed to already account for
/// that).
pub struct DirectlyConfiguredMachine;

impl Machine for DirectlyConfiguredMachine {
    fn run_cron(&self) -> bool {
        false
    }

    fn configure_cron(&self) -> bool {
        false
    }

    fn worker_names(&self, settings: &Settings) -> Vec<(QueueName, WorkerNumber)> {
        let counts = settings.get_queue_counts();
        let mut queues: Vec<&QueueName> = counts.keys().collect();
        queues.sort();

        queues
            .into_iter()
            .flat_map(|queue| {
                let count = counts[queue];
                (1..=count).map(move |n| (queue.clone(), WorkerNumber(n)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_settings() -> Settings {
        std::env::set_var("QUEUE_REDIS_HOST", "127.0.0.1");
        Settings::load(None).expect("settings should load from env defaults")
    }

    #[test]
    fn pooled_machine_splits_workers_round_robin() {
        let settings = test_settings();
        settings.set_worker_count(QueueName::from("alpha"), 2).unwrap();
        settings.set_worker_count(QueueName::from("beta"), 2).unwrap();

        let machine_one = PooledMachine::new(1, 2, None);
        let machine_two = PooledMachine::new(2, 2, None);

        let one = machine_one.worker_names(&settings);
        let two = machine_two.worker_names(&settings);

        assert_eq!(one.len() + two.len(), 4);
        let mut combined: HashMap<(QueueName, WorkerNumber), ()> = HashMap::new();
        for pair in one.into_iter().chain(two.into_iter()) {
            assert!(combined.insert(pair, ()).is_none(), "worker assigned twice");
        }
    }

    #[test]
    fn pooled_machine_assigns_pair_index_i_to_machine_i_mod_count_plus_one() {
        let settings = test_settings();
        settings.set_worker_count(QueueName::from("alpha"), 2).unwrap();
        settings.set_worker_count(QueueName::from("beta"), 3).unwrap();

        let machine_one = PooledMachine::new(1, 2, None);
        let machine_two = PooledMachine::new(2, 2, None);

        // Pairs sorted by queue: (alpha,1)=i0 (alpha,2)=i1 (beta,1)=i2
        // (beta,2)=i3 (beta,3)=i4. machine = (i % 2) + 1.
        assert_eq!(
            machine_one.worker_names(&settings),
            vec![
                (QueueName::from("alpha"), WorkerNumber(1)),
                (QueueName::from("beta"), WorkerNumber(1)),
                (QueueName::from("beta"), WorkerNumber(3)),
            ]
        );
        assert_eq!(
            machine_two.worker_names(&settings),
            vec![
                (QueueName::from("alpha"), WorkerNumber(2)),
                (QueueName::from("beta"), WorkerNumber(2)),
            ]
        );
    }

    #[test]
    fn pooled_machine_respects_only_queue() {
        let settings = test_settings();
        settings.set_worker_count(QueueName::from("alpha"), 1).unwrap();
        settings.set_worker_count(QueueName::from("beta"), 1).unwrap();

        let machine = PooledMachine::new(1, 1, Some(QueueName::from("alpha")));
        let names = machine.worker_names(&settings);
        assert_eq!(names, vec![(QueueName::from("alpha"), WorkerNumber(1))]);
    }

    #[test]
    fn directly_configured_machine_never_runs_cron() {
        let m = DirectlyConfiguredMachine;
        assert!(!m.run_cron());
        assert!(!m.configure_cron());
    }
}
