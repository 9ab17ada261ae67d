// Test-only topology fixtures for `channelgrid-lib` unit tests
#![allow(dead_code)]
use crate::topology::Topology;

/// Device 10 with one cable pair toward each of two controllers.
///
/// ```text
/// 1(C) - 12 - 11 - 10(D) - 21 - 22 - 2(C)
/// ```
pub fn two_controller_fan() -> Topology {
    Topology::builder()
        .controller(1)
        .controller(2)
        .device(10)
        .cable(11)
        .cable(12)
        .cable(21)
        .cable(22)
        .chain(&[10, 11, 12, 1])
        .chain(&[10, 21, 22, 2])
        .build()
        .expect("fan topology is valid")
}

/// `1(C) - 2(D) - 3(D)`
pub fn two_device_chain() -> Topology {
    Topology::builder()
        .controller(1)
        .device(2)
        .device(3)
        .chain(&[1, 2, 3])
        .build()
        .expect("chain topology is valid")
}

/// A trunk from one controller that branches twice before reaching three devices.
///
/// ```text
/// 1(C) - 2 - 3 - 4 - 5 - 6(D)
///                |    \
///                7     8 - 9(D)
///                |
///               10(D)
/// ```
pub fn branching_tree() -> Topology {
    Topology::builder()
        .controller(1)
        .cable(2)
        .cable(3)
        .cable(4)
        .cable(5)
        .device(6)
        .cable(7)
        .cable(8)
        .device(9)
        .device(10)
        .chain(&[1, 2, 3, 4, 5, 6])
        .chain(&[4, 7, 10])
        .chain(&[5, 8, 9])
        .build()
        .expect("tree topology is valid")
}

/// Two controllers joined by a ring of cables with devices hanging off it.
///
/// ```text
/// 1(C) - 2 - 3 - 4(D)
///  |         |
///  6         5(D)
///  |         |
///  7 ------- 8
///  |
/// 9(C)
/// ```
pub fn ring_with_two_controllers() -> Topology {
    Topology::builder()
        .controller(1)
        .controller(9)
        .cable(2)
        .cable(3)
        .device(4)
        .device(5)
        .cable(6)
        .cable(7)
        .cable(8)
        .chain(&[1, 2, 3, 4])
        .chain(&[3, 5, 8, 7, 6, 1])
        .link(7, 9)
        .build()
        .expect("ring topology is valid")
}
