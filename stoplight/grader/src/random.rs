use alloc::vec::Vec;
use kestrel::{
    thread::scheduler::{Fifo, Lottery, RoundRobin, Scheduler},
    util::random::{Lcg, RandomSource},
};
use stoplight::{NUMROUTES, Vehicle};

/// The generator is the classic `rand()`: seed 1 yields 16838, 5758, 10113.
pub fn lcg_reference() {
    let mut rng = Lcg::new(1);
    assert_eq!(rng.next_u32(), (16838 << 17) ^ (5758 << 2) ^ 10113);
}

/// Equal seeds give equal sequences, and draws stay in range.
pub fn lcg_determinism() {
    let draw = |seed| {
        let mut rng = Lcg::new(seed);
        (0..64).map(|_| rng.below(7)).collect::<Vec<_>>()
    };
    assert_eq!(draw(42), draw(42));
    assert_ne!(draw(42), draw(43));
    assert!(draw(42).iter().all(|v| *v < 7));

    let mut rng = Lcg::new(5);
    assert_eq!(rng.below(0), 0);
    assert_eq!(rng.below(1), 0);
    let heads = (0..1000).filter(|_| rng.coin()).count();
    assert!((300..700).contains(&heads), "a biased coin: {heads}");
}

/// Random vehicles cover every lane, turn and class.
pub fn vehicle_draws() {
    let mut rng = Lcg::new(3);
    let vehicles = (0..300)
        .map(|n| Vehicle::random(n, &mut rng))
        .collect::<Vec<_>>();
    let mut lanes = [0; NUMROUTES];
    for v in vehicles.iter() {
        lanes[v.lane.index()] += 1;
    }
    assert!(lanes.iter().all(|n| *n > 50), "lanes: {lanes:?}");
    assert!(vehicles.iter().any(|v| v.turn == stoplight::Turn::Left));
    assert!(vehicles.iter().any(|v| v.turn == stoplight::Turn::Right));
    assert!(vehicles.iter().any(|v| v.kind == stoplight::VehicleKind::Car));
    assert!(vehicles.iter().any(|v| v.kind == stoplight::VehicleKind::Truck));
    assert!(vehicles.iter().enumerate().all(|(n, v)| v.number == n));
}

/// FIFO hands threads out in push order and never preempts.
pub fn fifo() {
    let fifo = Fifo::new();
    assert_eq!(fifo.preallocate(4), Ok(()));
    assert_eq!(fifo.next_to_run(), None);
    for tid in [3, 1, 2] {
        fifo.push_to_queue(tid);
    }
    assert!(!fifo.timer_tick());
    assert_eq!(fifo.next_to_run(), Some(3));
    assert_eq!(fifo.next_to_run(), Some(1));
    fifo.killall();
    assert_eq!(fifo.next_to_run(), None);
}

/// Round robin preempts after its quantum, counted from the last pick.
pub fn round_robin() {
    let rr = RoundRobin::new(3);
    rr.push_to_queue(1);
    rr.push_to_queue(2);
    assert_eq!(rr.next_to_run(), Some(1));
    assert!(!rr.timer_tick());
    assert!(!rr.timer_tick());
    assert!(rr.timer_tick());
    assert_eq!(rr.next_to_run(), Some(2));
    assert!(!rr.timer_tick());
}

/// The lottery returns every runnable thread exactly once.
pub fn lottery() {
    let lottery = Lottery::new(11, 2);
    assert_eq!(lottery.preallocate(16), Ok(()));
    for tid in 0..16 {
        lottery.push_to_queue(tid);
    }
    let mut drawn = (0..16)
        .map(|_| lottery.next_to_run().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(lottery.next_to_run(), None);
    assert_ne!(drawn, (0..16).collect::<Vec<_>>(), "not shuffled at all");
    drawn.sort();
    assert_eq!(drawn, (0..16).collect::<Vec<_>>());

    let preempted = (0..1000).filter(|_| lottery.timer_tick()).count();
    assert!((300..700).contains(&preempted));
}
