use smithay::utils::Transform;
use wlr_output_management_config as config;

/// Transform for a raw `wl_output.transform` value.
pub fn transform_from_raw(raw: i32) -> Option<Transform> {
    let transform = match raw {
        0 => Transform::Normal,
        1 => Transform::_90,
        2 => Transform::_180,
        3 => Transform::_270,
        4 => Transform::Flipped,
        5 => Transform::Flipped90,
        6 => Transform::Flipped180,
        7 => Transform::Flipped270,
        _ => return None,
    };
    Some(transform)
}

pub fn transform_to_raw(transform: Transform) -> i32 {
    match transform {
        Transform::Normal => 0,
        Transform::_90 => 1,
        Transform::_180 => 2,
        Transform::_270 => 3,
        Transform::Flipped => 4,
        Transform::Flipped90 => 5,
        Transform::Flipped180 => 6,
        Transform::Flipped270 => 7,
    }
}

pub fn transform_from_config(transform: config::Transform) -> Transform {
    match transform {
        config::Transform::Normal => Transform::Normal,
        config::Transform::_90 => Transform::_90,
        config::Transform::_180 => Transform::_180,
        config::Transform::_270 => Transform::_270,
        config::Transform::Flipped => Transform::Flipped,
        config::Transform::Flipped90 => Transform::Flipped90,
        config::Transform::Flipped180 => Transform::Flipped180,
        config::Transform::Flipped270 => Transform::Flipped270,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_transform_values() {
        for raw in 0..8 {
            let transform = transform_from_raw(raw).unwrap();
            assert_eq!(transform_to_raw(transform), raw);
        }

        assert_eq!(transform_from_raw(-1), None);
        assert_eq!(transform_from_raw(8), None);
    }
}
