use log::debug;
use std::iter::Peekable;
use std::str::Chars;

/// Classes named in a generic signature (of a class, method, field, or local variable)
///
/// Type variables are skipped, and for nested types like `Outer<T>.Inner` only the outer class
/// is reported. Parsing stops at the first malformed character, keeping what was found so far.
pub fn signature_classes(signature: &str) -> Vec<String> {
    let mut parser = SignatureParser {
        chars: signature.chars().peekable(),
        classes: vec![],
    };
    if parser.signature().is_none() {
        debug!("Malformed generic signature '{}'", signature);
    }
    parser.classes
}

struct SignatureParser<'s> {
    chars: Peekable<Chars<'s>>,
    classes: Vec<String>,
}

impl<'s> SignatureParser<'s> {
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn signature(&mut self) -> Option<()> {
        if self.peek() == Some('<') {
            self.type_parameters()?;
        }
        if self.peek() == Some('(') {
            self.chars.next();
            while self.peek()? != ')' {
                self.java_type()?;
            }
            self.chars.next();
            self.java_type()?;
            while self.peek() == Some('^') {
                self.chars.next();
                self.java_type()?;
            }
        } else {
            while self.peek().is_some() {
                self.java_type()?;
            }
        }
        Some(())
    }

    /// `<T:bound:bound U::bound>` (class bounds may be empty)
    fn type_parameters(&mut self) -> Option<()> {
        self.chars.next();
        while self.peek()? != '>' {
            while self.chars.next()? != ':' {}
            if matches!(self.peek(), Some('L' | '[' | 'T')) {
                self.java_type()?;
            }
            while self.peek() == Some(':') {
                self.chars.next();
                self.java_type()?;
            }
        }
        self.chars.next();
        Some(())
    }

    fn java_type(&mut self) -> Option<()> {
        match self.chars.next()? {
            'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z' | 'V' => Some(()),
            '[' => self.java_type(),
            'T' => {
                while self.chars.next()? != ';' {}
                Some(())
            }
            'L' => self.class_type(),
            _ => None,
        }
    }

    fn class_type(&mut self) -> Option<()> {
        let mut name = String::new();
        let mut in_outer_class = true;
        loop {
            match self.chars.next()? {
                '<' => self.type_arguments()?,
                '.' => in_outer_class = false,
                ';' => break,
                c if in_outer_class => name.push(c),
                _ => (),
            }
        }
        self.classes.push(name);
        Some(())
    }

    fn type_arguments(&mut self) -> Option<()> {
        loop {
            match self.peek()? {
                '>' => {
                    self.chars.next();
                    return Some(());
                }
                '*' => {
                    self.chars.next();
                }
                '+' | '-' => {
                    self.chars.next();
                    self.java_type()?;
                }
                _ => self.java_type()?,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn class_signatures() {
        assert_eq!(
            signature_classes("<T::Ljava/lang/Comparable<-TT;>;>Ljava/lang/Object;Lme/Api<TT;>;"),
            vec!["java/lang/Comparable", "java/lang/Object", "me/Api"]
        );
    }

    #[test]
    fn method_signatures() {
        assert_eq!(
            signature_classes("<E:Ljava/lang/Exception;>(Ljava/util/List<+Lme/Item;>;[TE;I)TE;^TE;^Lme/Oops;"),
            vec!["java/lang/Exception", "me/Item", "java/util/List", "me/Oops"]
        );
    }

    #[test]
    fn nested_and_malformed() {
        assert_eq!(
            signature_classes("Lme/Outer<*>.Inner<Lme/Arg;>;"),
            vec!["me/Arg", "me/Outer"]
        );
        assert_eq!(signature_classes("Lme/Seen;Q"), vec!["me/Seen"]);
    }
}
