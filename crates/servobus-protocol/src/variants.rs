//! Built-in protocol variants.
//!
//! Each variant pairs a memory-map schema with an instruction set. Schemas
//! compose: a variant may extend another variant's field list, in which case
//! the extension fields are appended after the base fields.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ProtocolError;
use crate::instruction::InstructionSpec;
use crate::memory_map::FieldSpec;

/// The fixed set of supported variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VariantKind {
    /// Robotis Dynamixel-style servo.
    #[default]
    #[serde(rename = "RobotisServo")]
    RobotisServo,
    /// AVR-based servo: Robotis layout plus controller tuning fields.
    #[serde(rename = "AVRServo")]
    AvrServo,
    /// SPI sensor bridge sharing the common header fields.
    #[serde(rename = "SPIConnector")]
    SpiConnector,
    /// DD servo with fixed-point parameters and its own instruction set.
    #[serde(rename = "DDServo")]
    DdServo,
}

impl VariantKind {
    /// Every supported variant.
    pub const ALL: [VariantKind; 4] = [
        VariantKind::RobotisServo,
        VariantKind::AvrServo,
        VariantKind::SpiConnector,
        VariantKind::DdServo,
    ];

    /// The variant's name as used in configuration.
    pub const fn name(self) -> &'static str {
        match self {
            VariantKind::RobotisServo => "RobotisServo",
            VariantKind::AvrServo => "AVRServo",
            VariantKind::SpiConnector => "SPIConnector",
            VariantKind::DdServo => "DDServo",
        }
    }

    /// The variant's complete field list, base fields first.
    pub fn field_specs(self) -> Vec<FieldSpec> {
        match self {
            VariantKind::RobotisServo => [COMMON_FIELDS, ROBOTIS_FIELDS].concat(),
            VariantKind::AvrServo => [COMMON_FIELDS, ROBOTIS_FIELDS, AVR_FIELDS].concat(),
            VariantKind::SpiConnector => [COMMON_FIELDS, SPI_CONNECTOR_FIELDS].concat(),
            VariantKind::DdServo => DD_SERVO_FIELDS.to_vec(),
        }
    }

    /// The variant's instruction set.
    pub fn instruction_specs(self) -> &'static [InstructionSpec] {
        match self {
            VariantKind::DdServo => DD_SERVO_INSTRUCTIONS,
            _ => DEFAULT_INSTRUCTIONS,
        }
    }
}

impl std::fmt::Display for VariantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VariantKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VariantKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ProtocolError::UnknownVariant(s.to_string()))
    }
}

// ============================================================================
// Instruction Sets
// ============================================================================

/// Robotis-style instruction set; also used by variants without their own.
pub const DEFAULT_INSTRUCTIONS: &[InstructionSpec] = &[
    (0x01, "PING", "request a ping packet (broadcast: yes)"),
    (0x02, "READ", "memory address, length | returned values have little endian format (broadcast: no)"),
    (0x03, "WRITE", "memory address, N values | assigned values have little endian format (broadcast: yes)"),
    (0x04, "REG_WRITE", "memory address, N values | assigned values have little endian format (broadcast: yes)"),
    (0x05, "ACTION", "commit reg_write values to memory (broadcast: yes)"),
    (0x06, "RESET", "reset all servo settings including the servo id (broadcast: yes)"),
    (0x83, "SYNC_WRITE", "(broadcast: yes)"),
    (249, "GYRO", ""),
    (250, "COUNT", ""),
    (252, "START", ""),
    (253, "STOP", ""),
];

/// DD servo instruction set.
pub const DD_SERVO_INSTRUCTIONS: &[InstructionSpec] = &[
    (0x00, "START BOOTLOADER", "0x01, 0x02, 0x03, 0x04 (broadcast: yes)"),
    (0x11, "PING", "optional red, green and blue signal color value (broadcast: yes)"),
    (0x12, "READ", "memory address, length | returned values have little endian format (broadcast: no)"),
    (0x13, "WRITE", "memory address, N values | assigned values have little endian format (broadcast: yes)"),
    (0x14, "SET MOTOR POWER", "motor power off (0), motor power on (1) (broadcast: yes)"),
    (0x15, "SET LOGGING", "logging off (0), logging on (1) (broadcast: yes)"),
    (0x16, "SET CONTROL MODE", "position control mode without trajectory (0), position control mode with trajectory (1), speed control mode without trajectory (2), speed control mode with trajectory (3), [torque control mode (4)], pulse width control mode (5) (broadcast: yes)"),
    (0x17, "WRITE PENDING DATA", "memory address and values | assigned values have little endian format (broadcast: yes)"),
    (0x18, "TRIGGER PENDING DATA", "(broadcast: yes)"),
    (0x19, "SYNCHRONIZED READ DATA", "memory address, length, 1. servo id ... S. servo id or broadcast id | returned values have little endian format (broadcast: no)"),
    (0x1A, "SYNCHRONIZED WRITE DATA", "memory address, length, 1. servo id, N values ... S. servo id, N values | assigned values have little endian format (broadcast: yes)"),
    (0x1B, "READ LOGGING DATA", "(broadcast: no)"),
    (0x1C, "READ CHECKSUM", "(broadcast: no)"),
    (0x1D, "SET POSITION OFFSET", "0x01, 0x02, 0x03, 0x04 optional position offset | assigned values have little endian format (broadcast: yes)"),
    (0x1E, "REBOOT SERVO", "0x01, 0x02, 0x03, 0x04 (broadcast: yes)"),
    (0x1F, "RESET ERRORS", "0x01, 0x02, 0x03, 0x04 (broadcast: yes)"),
    (0x20, "RESET", "0x01, 0x02, 0x03, 0x04 (broadcast: yes)"),
];

// ============================================================================
// Field Schemas
// ============================================================================

/// Header fields shared by the Robotis-family devices.
pub const COMMON_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("ModelNumber", "signed short").writable(),
    FieldSpec::new("VersionofFirmware", "unsigned char").writable(),
    FieldSpec::new("servoId", "unsigned char").writable(),
    FieldSpec::new("BaudRateDivisor", "unsigned char").writable(),
    FieldSpec::new("ReturnDelayTime", "unsigned char").writable(),
];

/// Robotis servo fields following the common header.
pub const ROBOTIS_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("CWAngleLimit", "signed short").writable(),
    FieldSpec::new("CCWAngleLimit", "signed short").writable(),
    FieldSpec::new("Reserved1", "unsigned char"),
    FieldSpec::new("HighestLimitTemperature", "unsigned char").writable(),
    FieldSpec::new("LowestLimitVoltage", "unsigned char").writable(),
    FieldSpec::new("HighestLimitVoltage", "unsigned char").writable(),
    FieldSpec::new("MaxTorque", "signed short").writable(),
    FieldSpec::new("StatusReturnLevel", "unsigned char").writable(),
    FieldSpec::new("AlarmLED", "unsigned char").writable(),
    FieldSpec::new("AlarmShutdown", "unsigned char").writable(),
    FieldSpec::new("Reserved2", "unsigned char"),
    FieldSpec::new("DownCalibration", "signed short"),
    FieldSpec::new("UpCalibration", "signed short"),
    FieldSpec::new("TorqueEnable", "unsigned char").writable(),
    FieldSpec::new("LED", "unsigned char").writable(),
    FieldSpec::new("CWComplianceMargin", "unsigned char").writable(),
    FieldSpec::new("CCWComplianceMargin", "unsigned char").writable(),
    FieldSpec::new("CWComplianceSlope", "unsigned char").writable(),
    FieldSpec::new("CCWComplianceSlope", "unsigned char").writable(),
    FieldSpec::new("GoalPosition", "signed short").writable(),
    FieldSpec::new("MovingSpeed", "signed short").writable(),
    FieldSpec::new("TorqueLimit", "signed short").writable(),
    FieldSpec::new("PresentPosition", "signed short"),
    FieldSpec::new("PresentSpeed", "signed short"),
    FieldSpec::new("PresentLoad", "signed short"),
    FieldSpec::new("PresentVoltage", "unsigned char"),
    FieldSpec::new("PresentTemperature", "unsigned char"),
    FieldSpec::new("RegisteredInstruction", "unsigned char"),
    FieldSpec::new("Reserved3", "unsigned char"),
    FieldSpec::new("Moving", "unsigned char"),
    FieldSpec::new("Lock", "unsigned char").writable(),
    FieldSpec::new("Punch", "signed short").writable(),
];

/// AVR servo controller fields following the Robotis layout.
pub const AVR_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("ControllerProportionalFactor", "signed short").writable(),
    FieldSpec::new("ControllerIntegralFactor", "signed short").writable(),
    FieldSpec::new("ControllerDerivativeFactor", "signed short").writable(),
    FieldSpec::new("ControlLoopTimeouts", "signed short"),
    FieldSpec::new("adcMeasuringsPerLoop", "unsigned char"),
];

/// SPI connector fields following the common header.
pub const SPI_CONNECTOR_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("reservedEEPROM", "unsigned char[10]"),
    FieldSpec::new("StatusReturnLevel", "unsigned char").writable(),
    FieldSpec::new("reservedEEPROM2", "unsigned char[7]"),
    FieldSpec::new("positionRoll", "signed int").writable(),
    FieldSpec::new("positionPitch", "signed int").writable(),
    FieldSpec::new("positionYaw", "signed int").writable(),
    FieldSpec::new("gyroRoll", "signed short"),
    FieldSpec::new("gyroPitch", "signed short"),
    FieldSpec::new("gyroYaw", "signed short"),
    FieldSpec::new("accelerometerX", "signed short"),
    FieldSpec::new("accelerometerY", "signed short"),
    FieldSpec::new("accelerometerZ", "signed short"),
    FieldSpec::new("gyroRollNew", "unsigned char"),
    FieldSpec::new("gyroPitchNew", "unsigned char"),
    FieldSpec::new("gyroYawNew", "unsigned char"),
    FieldSpec::new("accelerometerXNew", "unsigned char"),
    FieldSpec::new("accelerometerYNew", "unsigned char"),
    FieldSpec::new("accelerometerZNew", "unsigned char"),
    FieldSpec::new("numDataRead", "unsigned char"),
    FieldSpec::new("ControlLoopTimeouts", "signed short"),
    FieldSpec::new("command", "unsigned char").writable(),
    FieldSpec::new("address", "unsigned char").writable(),
    FieldSpec::new("value", "signed short").writable(),
];

/// Status flag names of the DD servo `flags` field.
pub const DD_FLAG_NAMES: &[&str] = &[
    "FLAG_MOTOR_POWER_ACTIVATED",
    "FLAG_LOGGING_ACTIVATED",
    "FLAG_CONTROL_MODE_LOW",
    "FLAG_CONTROL_MODE_HIGH",
    "FLAG_COMMUNICATION_RECEPTION_IN_PROGRESS",
    "FLAG_COMMUNICATION_TRANSMISSION_IN_PROGRESS",
    "FLAG_COMMUNICATION_BAUDRATE_UPDATE",
    "FLAG_COMMUNICATION_PROTOCOL_SYNCHRONIZED_READ_IN_PROGRESS",
    "FLAG_COMMUNICATION_COLOR_PING_REQUEST",
    "FLAG_COMMUNICATION_PENDING_DATA_REGISTERED",
    "FLAG_POSITION_SENSOR_DEACTIVATED",
    "FLAG_POSITION_SENSOR_ACTIVATED",
    "FLAG_TEMPERATURE_SENSOR_CALIBRATION",
    "FLAG_ANALOG_CONVERTER_INITIALIZATION",
    "FLAG_ANALOG_CONVERTER_ACTIVATED",
];

/// Error flag names of the DD servo `errors` field.
pub const DD_ERROR_NAMES: &[&str] = &[
    "ERROR_POSITION_LIMIT",
    "ERROR_TORQUE_LIMIT",
    "ERROR_CURRENT_LIMIT",
    "ERROR_VOLTAGE_LIMIT",
    "ERROR_MOTOR_TEMPERATURE_LIMIT",
    "ERROR_CONTROLLER_TEMPERATURE_LIMIT",
    "ERROR_PARAMETER_RANGE",
    "ERROR_CHECKSUM",
    "ERROR_INSTRUCTION",
    "ERROR_COMMUNICATION",
    "ERROR_ANALOG_CONVERTER",
    "ERROR_POSITION_SENSOR",
    "ERROR_EEPROM",
    "ERROR_TASK_MANAGEMENT",
    "ERROR_DATA_LOSS",
];

/// DD servo memory layout.
pub const DD_SERVO_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("modelNumber", "uint16_t").writable(),
    FieldSpec::new("firmwareVersion", "uint16_t").writable(),
    FieldSpec::new("servoId", "uint8_t").writable(),
    FieldSpec::new("statusReturnLevel", "uint8_t").writable(),
    FieldSpec::new("statusReturnDelayTime", "uint16_t").writable(),
    FieldSpec::new("baudrateDivider", "uint16_t").writable(),
    FieldSpec::new("positionOffset", "uint16_t").writable(),
    FieldSpec::new("positionLimitClockwise", "fxp32_t").writable(),
    FieldSpec::new("positionLimitCounterclockwise", "fxp32_t").writable(),
    FieldSpec::new("torqueLimit", "fxp32_t").writable(),
    FieldSpec::new("currentLimit", "fxp32_t").writable(),
    FieldSpec::new("voltageLimitLow", "fxp16_t").writable(),
    FieldSpec::new("voltageLimitHigh", "fxp16_t").writable(),
    FieldSpec::new("motorTemperatureLimit", "fxp16_t").writable(),
    FieldSpec::new("controllerTemperatureLimit", "fxp16_t").writable(),
    FieldSpec::new("controllerTemperatureOffset", "fxp16_t").writable(),
    FieldSpec::new("statusSignal", "uint16_t").writable(),
    FieldSpec::new("alarmSignal", "uint16_t").writable(),
    FieldSpec::new("alarmShutdown", "uint16_t").writable(),
    FieldSpec::new("skipZoneParameter", "fxp32_t").writable(),
    FieldSpec::new("feedForwardControlParameter", "fxp32_t").writable(),
    FieldSpec::new("proportionalPositionControlParameter", "fxp32_t").writable(),
    FieldSpec::new("integralPositionControlParameter", "fxp32_t").writable(),
    FieldSpec::new("derivativePositionControlParameter", "fxp32_t").writable(),
    FieldSpec::new("positionComplianceParameter", "fxp32_t").writable(),
    FieldSpec::new("proportionalSpeedControlParameter", "fxp32_t").writable(),
    FieldSpec::new("integralSpeedControlParameter", "fxp32_t").writable(),
    FieldSpec::new("derivativeSpeedControlParameter", "fxp32_t").writable(),
    FieldSpec::new("speedComplianceParameter", "fxp32_t").writable(),
    FieldSpec::new("desiredPosition", "fxp32_t").writable(),
    FieldSpec::new("desiredSpeed", "fxp32_t").writable(),
    FieldSpec::new("desiredAcceleration", "fxp32_t").writable(),
    FieldSpec::new("desiredPulseWidth", "int16_t").writable(),
    FieldSpec::new("actualPulseWidth", "int16_t"),
    FieldSpec::new("actualPositionMeasurement", "uint16_t"),
    FieldSpec::new("actualPositionStatus", "uint16_t"),
    FieldSpec::new("actualSystemTime", "uint32_t"),
    FieldSpec::new("actualPosition", "fxp32_t"),
    FieldSpec::new("actualSpeed", "fxp32_t"),
    FieldSpec::new("actualTorque", "fxp32_t"),
    FieldSpec::new("actualCurrent", "fxp32_t"),
    FieldSpec::new("actualVoltage", "fxp16_t"),
    FieldSpec::new("actualMotorTemperature", "fxp16_t"),
    FieldSpec::new("actualControllerTemperature", "fxp16_t"),
    FieldSpec::new("flags", "uint16_t").flags(DD_FLAG_NAMES),
    FieldSpec::new("errors", "uint16_t").flags(DD_ERROR_NAMES),
    FieldSpec::new("checksum", "uint16_t"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::InstructionTable;
    use crate::memory_map::MemoryMap;

    #[test]
    fn test_every_variant_builds() {
        for kind in VariantKind::ALL {
            let map = MemoryMap::from_specs(&kind.field_specs()).unwrap();
            assert!(map.total_memory_size() > 0, "{} has an empty map", kind);
            InstructionTable::from_specs(kind.instruction_specs()).unwrap();
        }
    }

    #[test]
    fn test_variant_names_round_trip() {
        for kind in VariantKind::ALL {
            assert_eq!(kind.name().parse::<VariantKind>().unwrap(), kind);
        }
        assert_eq!(
            "Stepper".parse::<VariantKind>().unwrap_err(),
            ProtocolError::UnknownVariant("Stepper".to_string())
        );
    }

    #[test]
    fn test_extension_appends_fields() {
        let robotis = MemoryMap::for_variant("RobotisServo").unwrap();
        let avr = MemoryMap::for_variant("AVRServo").unwrap();

        assert_eq!(robotis.total_memory_size(), 50);
        let first_extension = avr.field_named("ControllerProportionalFactor").unwrap();
        assert_eq!(first_extension.address, robotis.total_memory_size());
        assert_eq!(
            avr.field_named("GoalPosition").unwrap().address,
            robotis.field_named("GoalPosition").unwrap().address
        );
    }

    #[test]
    fn test_dd_servo_layout() {
        let map = MemoryMap::for_variant("DDServo").unwrap();
        assert_eq!(map.field_named("servoId").unwrap().address, 4);
        assert_eq!(map.field_named("positionLimitClockwise").unwrap().address, 12);
        assert_eq!(map.total_memory_size(), 136);
    }

    #[test]
    fn test_spi_connector_has_arrays() {
        let map = MemoryMap::for_variant("SPIConnector").unwrap();
        let reserved = map.field_named("reservedEEPROM").unwrap();
        assert_eq!(reserved.element_count, 10);
        assert_eq!(map.field_named("StatusReturnLevel").unwrap().address, 16);
    }
}
