//! The `say` application.

wire_enum! {
    /// What kind of value is being spoken.
    pub enum SayType: ParseSayTypeError("say type") {
        Number => "NUMBER",
        Items => "ITEMS",
        Persons => "PERSONS",
        Messages => "MESSAGES",
        Currency => "CURRENCY",
        TimeMeasurement => "TIME_MEASUREMENT",
        CurrentDate => "CURRENT_DATE",
        CurrentTime => "CURRENT_TIME",
        CurrentDateTime => "CURRENT_DATE_TIME",
        TelephoneNumber => "TELEPHONE_NUMBER",
        TelephoneExtension => "TELEPHONE_EXTENSION",
        Url => "URL",
        IpAddress => "IP_ADDRESS",
        EmailAddress => "EMAIL_ADDRESS",
        PostalAddress => "POSTAL_ADDRESS",
        AccountNumber => "ACCOUNT_NUMBER",
        NameSpelled => "NAME_SPELLED",
        NamePhonetic => "NAME_PHONETIC",
        ShortDateTime => "SHORT_DATE_TIME",
    }
}

wire_enum! {
    pub enum SayMethod: ParseSayMethodError("say method") {
        Pronounced => "pronounced",
        Iterated => "iterated",
        Counted => "counted",
    }
}

wire_enum! {
    pub enum SayGender: ParseSayGenderError("say gender") {
        Feminine => "FEMININE",
        Masculine => "MASCULINE",
        Neuter => "NEUTER",
    }
}

/// Arguments of `say`: `<language> <type> <method> <gender> <text>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SayOptions {
    pub language: String,
    pub say_type: SayType,
    pub method: SayMethod,
    pub gender: SayGender,
    pub text: String,
}

impl SayOptions {
    pub fn new(say_type: SayType, text: impl Into<String>) -> Self {
        Self {
            language: "en".to_string(),
            say_type,
            method: SayMethod::Pronounced,
            gender: SayGender::Neuter,
            text: text.into(),
        }
    }

    pub fn to_args(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.language, self.say_type, self.method, self.gender, self.text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn say_args() {
        let mut options = SayOptions::new(SayType::CurrentDate, "1700000000");
        options.method = SayMethod::Iterated;
        assert_eq!(options.to_args(), "en CURRENT_DATE iterated NEUTER 1700000000");
    }
}
