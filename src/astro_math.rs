//! Sidereal-time math used to turn celestial coordinates into mount
//! angles. Everything is f64; angles are radians unless a name says
//! otherwise.

use chrono::{DateTime, Datelike, Timelike, Utc};
use polynomials::poly;
use std::f64::consts::{PI, TAU};

pub type Hours = f64;
pub type Degrees = f64;
pub type Radians = f64;

pub fn deg_to_rad(degrees: Degrees) -> Radians {
    PI * degrees / 180.
}

pub fn rad_to_deg(rad: Radians) -> Degrees {
    180. * rad / PI
}

pub fn hours_to_rad(hours: Hours) -> Radians {
    PI * hours / 12.
}

pub fn rad_to_hours(rad: Radians) -> Hours {
    12. * rad / PI
}

pub fn deg_to_hours(deg: Degrees) -> Hours {
    deg / 15.
}

pub fn modulo(val: f64, base: f64) -> f64 {
    ((val % base) + base) % base
}

// Convert hms to fractional hours
fn ms_to_dec(d: u32, minutes: u32, seconds: f64) -> f64 {
    (d as f64) + (minutes as f64) / 60. + seconds / 3600.
}

/// Calculates the Julian Date of a time
/// see https://scienceworld.wolfram.com/astronomy/JulianDate.html
fn calc_jd(time: DateTime<Utc>) -> f64 {
    let y = time.year() as f64;
    let m = time.month() as f64;
    let d = time.day() as f64;

    let mut jd = 367. * y;
    jd -= f64::floor(7. * (y + f64::floor((m + 9.) / 12.)) / 4.);
    jd -= f64::floor(3. * (f64::floor((y + (m - 9.) / 7.) / 100.) + 1.) / 4.);
    jd += f64::floor(275. * m / 9.);
    jd += d;
    jd += 1721028.5;
    jd + ms_to_dec(time.hour(), time.minute(), time.second() as f64) / 24.
}

// see https://thecynster.home.blog/2019/11/04/calculating-sidereal-time/
pub fn calculate_greenwich_sidereal_time(time: DateTime<Utc>) -> Hours {
    // The result will be off by the number of leap seconds different from this on the date given
    const LEAP_SECOND_TOTAL: u32 = 27;

    let jd_utc = calc_jd(time);

    let du = jd_utc - 2451545.0;
    let theta = rad_to_hours(modulo(
        TAU * (0.7790572732640 + 1.00273781191135448 * du),
        TAU,
    ));

    let poly = poly![
        0.014506,
        4612.156534,
        1.3915817,
        -0.00000044,
        -0.000029956,
        -0.0000000368
    ];
    let jd_tt = jd_utc + ((LEAP_SECOND_TOTAL as f64 + 32.184) / 3600.) / 24.;
    let t = (jd_tt - 2451545.0) / 36525.;

    let gmstp = deg_to_hours(modulo(poly.eval(t).unwrap() / 3600., 360.));

    modulo(theta + gmstp, 24.)
}

/// longitude in degrees, returns hours
pub fn calculate_local_sidereal_time(time: DateTime<Utc>, longitude: Degrees) -> Hours {
    let greenwich_sidereal_time = calculate_greenwich_sidereal_time(time);
    modulo(greenwich_sidereal_time + deg_to_hours(longitude), 24.)
}

/// Hour angle of a fixed right ascension, both in radians, in [0, 2pi).
pub fn ra_to_hour_angle(time: DateTime<Utc>, longitude: Degrees, ra: Radians) -> Radians {
    let lst = hours_to_rad(calculate_local_sidereal_time(time, longitude));
    modulo(lst - ra, TAU)
}

/// Right ascension of a fixed hour angle, both in radians, in [0, 2pi).
pub fn hour_angle_to_ra(time: DateTime<Utc>, longitude: Degrees, ha: Radians) -> Radians {
    let lst = hours_to_rad(calculate_local_sidereal_time(time, longitude));
    modulo(lst - ha, TAU)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_float_eq::*;
    use chrono::TimeZone;

    #[test]
    fn test_conversions() {
        assert_eq!(deg_to_rad(0.), 0.);
        assert_float_relative_eq!(deg_to_rad(55.), 0.9599311, 1e-4);
        assert_float_relative_eq!(rad_to_deg(1.), 57.29578, 1e-4);
        assert_float_relative_eq!(hours_to_rad(1.), 0.261799, 1e-4);
        assert_float_relative_eq!(rad_to_hours(-8.), -30.5577, 1e-4);
        assert_eq!(deg_to_hours(-120.), -8.);
    }

    #[test]
    fn test_modulo() {
        assert_eq!(modulo(TAU, PI), 0.);
        assert_eq!(modulo(-365., 360.), 355.);
    }

    #[test]
    fn test_calculate_greenwich_sidereal_time() {
        assert_float_relative_eq!(
            calculate_greenwich_sidereal_time(Utc.ymd(1969, 1, 6).and_hms(1, 5, 0)),
            8.1127421203,
            1E-4
        );
        assert_float_relative_eq!(
            calculate_greenwich_sidereal_time(Utc.ymd(2021, 1, 30).and_hms(21, 20, 0)),
            6.0219108930,
            1E-4
        );
    }

    #[test]
    fn test_calculate_local_sidereal_time() {
        assert_float_relative_eq!(
            calculate_local_sidereal_time(Utc.ymd(1969, 1, 6).and_hms(1, 5, 0), -55.5),
            4.4127385800,
            1E-4
        );
        assert_float_relative_eq!(
            calculate_local_sidereal_time(Utc.ymd(2021, 1, 30).and_hms(21, 20, 0), 90.),
            12.0219108930,
            1E-4
        );
    }

    #[test]
    fn test_ra_hour_angle_round_trip() {
        let time = Utc.ymd(2021, 1, 30).and_hms(21, 20, 0);
        let ra = hours_to_rad(12.);
        let ha = ra_to_hour_angle(time, 90., ra);
        assert_float_relative_eq!(ha, hours_to_rad(0.0219108930), 1E-4);
        assert_float_absolute_eq!(hour_angle_to_ra(time, 90., ha), ra, 1e-9);
    }
}
