//! Metric names recorded by the scheduler.
//!
//! Recording goes through the `metrics` facade; without an installed recorder every
//! call is a no-op. The application installs a Prometheus exporter and calls
//! [`describe_metrics`] once at startup.

use metrics::{describe_counter, describe_histogram};

/// Appointments booked successfully.
pub const APPOINTMENTS_BOOKED: &str = "scheduling_appointments_booked_total";

/// Appointments rescheduled successfully.
pub const APPOINTMENTS_RESCHEDULED: &str = "scheduling_appointments_rescheduled_total";

/// Failed operations, labelled by `operation` and error `code`.
pub const FAILURES: &str = "scheduling_failures_total";

/// Inventory units consumed by committed bookings and reschedules.
pub const UNITS_RESERVED: &str = "scheduling_units_reserved_total";

/// Wall time of each operation, labelled by `operation`.
pub const OPERATION_DURATION: &str = "scheduling_operation_duration_seconds";

/// Register descriptions for every scheduling metric.
pub fn describe_metrics() {
    describe_counter!(APPOINTMENTS_BOOKED, "Total number of appointments booked");
    describe_counter!(
        APPOINTMENTS_RESCHEDULED,
        "Total number of appointments rescheduled"
    );
    describe_counter!(FAILURES, "Total number of failed scheduling operations");
    describe_counter!(
        UNITS_RESERVED,
        "Total number of vaccine units drawn from inventory lots"
    );
    describe_histogram!(
        OPERATION_DURATION,
        "Time taken to complete a scheduling operation"
    );
}
